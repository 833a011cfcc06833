pub mod types;

pub use types::{Artwork, ArtworkDoc, ArtworkMedia, NewArtwork, UpdateArtwork, ARTWORK_ID_PREFIX};
