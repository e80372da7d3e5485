use base64::{prelude::BASE64_STANDARD, Engine};
use image::{imageops::FilterType, DynamicImage, GenericImageView, RgbImage};
use ndarray::Array4;
use thiserror::Error;

pub const INPUT_WIDTH: u32 = 224;
pub const INPUT_HEIGHT: u32 = 224;
pub const INPUT_CHANNELS: usize = 3;

#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("Invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Failed to read image bytes: {0}")]
    Io(#[from] std::io::Error),
    #[error("Error decoding image: {0}")]
    Image(#[from] image::ImageError),
}

/// Decodes a base64 payload, tolerating a `data:<mime>;base64,` prefix and
/// embedded ASCII whitespace.
pub fn decode_base64(encoded: &str) -> Result<Vec<u8>, PreprocessError> {
    let payload = match encoded.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => encoded,
    };
    let compact: String = payload
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();

    Ok(BASE64_STANDARD.decode(compact)?)
}

pub fn decode_image(image_data: &[u8]) -> Result<DynamicImage, PreprocessError> {
    let image_reader =
        image::ImageReader::new(std::io::Cursor::new(image_data)).with_guessed_format()?;

    Ok(image_reader.decode()?)
}

/// Resizes to the model resolution and forces three 8-bit channels. Applying
/// it to its own output returns the same pixels.
pub fn prepare_image(img: &DynamicImage) -> RgbImage {
    if img.dimensions() == (INPUT_WIDTH, INPUT_HEIGHT) {
        return img.to_rgb8();
    }
    img.resize_exact(INPUT_WIDTH, INPUT_HEIGHT, FilterType::CatmullRom)
        .to_rgb8()
}

/// NHWC tensor with a leading batch axis of one and values in `[0, 1]`.
pub fn to_input_tensor(img: &RgbImage) -> Array4<f32> {
    let (width, height) = img.dimensions();
    Array4::from_shape_fn(
        (1, height as usize, width as usize, INPUT_CHANNELS),
        |(_, y, x, c)| img.get_pixel(x as u32, y as u32)[c] as f32 / 255.,
    )
}

pub fn preprocess(encoded: &str) -> Result<Array4<f32>, PreprocessError> {
    let image_data = decode_base64(encoded)?;
    let img = decode_image(&image_data)?;
    tracing::debug!(
        "Decoded {}x{} image ({:?})",
        img.width(),
        img.height(),
        img.color()
    );

    Ok(to_input_tensor(&prepare_image(&img)))
}

#[cfg(test)]
pub(crate) fn encode_png(img: &DynamicImage) -> String {
    let mut image_data: Vec<u8> = Vec::new();
    img.write_to(
        &mut std::io::Cursor::new(&mut image_data),
        image::ImageFormat::Png,
    )
    .unwrap();
    BASE64_STANDARD.encode(image_data)
}
