pub mod check;
pub mod common;
pub mod inject;
pub mod inspect;
pub mod load;
pub mod restore;
