/// Image module - GPU images, mip scaling, and the image store

pub mod image;
pub mod image_store;
pub mod scale;

pub use image::{Image, ImageLayer, Mip, MAX_IMAGE_DIMENSION};
pub use image_store::{ImageKey, ImageStore, PixelData};
