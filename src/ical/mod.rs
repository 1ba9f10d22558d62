pub mod codec;
pub mod model;

pub use codec::{IcalError, generate, parse};
pub use model::{
    Alarm, CalAddress, CalDateTime, Event, EventStatus, Property, Transparency,
};
