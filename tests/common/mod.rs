pub mod entities;
pub mod fixtures;

#[allow(unused_imports)]
pub use entities::{Expert, Product};
#[allow(unused_imports)]
pub use fixtures::{
    appointment_row, availability_row, monday, FailingActor, GatedSource, SplitSource,
};
