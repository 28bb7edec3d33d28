pub mod guards;

pub use guards::{User, USER_ID_HEADER};
