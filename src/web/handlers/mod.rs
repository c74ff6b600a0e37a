pub mod authors;
pub mod inbox;
pub mod posts;
