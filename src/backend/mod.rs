pub mod headless;

pub use headless::{HeadlessContainer, HeadlessWindow};
