//! Data-driven colony content: goods, facility kinds and engine config read
//! from RON, TOML or JSON files.

pub mod loader;
pub mod schema;

pub use loader::{DataLoadError, GameData, load_game_data};
