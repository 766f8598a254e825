pub mod concat_map;
pub mod filter;
pub mod hide;
pub mod map;
pub mod retry;
