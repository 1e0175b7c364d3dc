//! The codec boundary between arrays and stored sample buffers
//!
//! Compressed samples are stored as self-describing image buffers
//! (jpeg/png); uncompressed samples are the array's packed bytes as-is.
//! Everything past this boundary is plain bytes to the engine.

use serde::{Deserialize, Serialize};

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, ExtendedColorType, ImageEncoder};

use crate::array::{Array, Dtype};
use crate::TenstoreError;

/// Supported per-sample codecs.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    Uncompressed,
    Jpeg,
    Png,
}

impl Compression {
    pub fn name(self) -> &'static str {
        match self {
            Compression::Uncompressed => "uncompressed",
            Compression::Jpeg => "jpeg",
            Compression::Png => "png",
        }
    }

    /// Parses the string form used in tensor metas.
    pub fn from_name(name: &str) -> crate::Result<Self> {
        match name {
            "uncompressed" => Ok(Compression::Uncompressed),
            "jpeg" => Ok(Compression::Jpeg),
            "png" => Ok(Compression::Png),
            other => Err(TenstoreError::UnsupportedCompression(other.to_string())),
        }
    }
}

impl std::fmt::Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> Result<(), std::fmt::Error> {
        f.write_str(self.name())
    }
}

/// What an array looks like to an image codec.
struct ImageLayout {
    width: u32,
    height: u32,
    color: ExtendedColorType,
}

fn image_layout(array: &Array, compression: Compression) -> crate::Result<ImageLayout> {
    let fail = |message: &str| TenstoreError::SampleCompression {
        shape: array.shape().to_vec(),
        compression,
        message: message.to_string(),
    };

    if array.dtype() != Dtype::U8 {
        return Err(fail("only u8 arrays can be image-encoded"));
    }

    let (height, width, channels) = match *array.shape() {
        [h, w] => (h, w, 1),
        [h, w, c @ (1 | 3 | 4)] => (h, w, c),
        _ => return Err(fail("shape is not (h, w) or (h, w, {1, 3, 4})")),
    };

    let color = match channels {
        1 => ExtendedColorType::L8,
        3 => ExtendedColorType::Rgb8,
        // jpeg has no alpha channel
        4 if compression == Compression::Png => ExtendedColorType::Rgba8,
        _ => return Err(fail("channel count is not supported by this codec")),
    };

    let width = u32::try_from(width).map_err(|_| fail("image dimensions exceed u32"))?;
    let height = u32::try_from(height).map_err(|_| fail("image dimensions exceed u32"))?;
    Ok(ImageLayout {
        width,
        height,
        color,
    })
}

/// Encodes an array with `compression`. The returned buffer carries all
/// the meta information needed by [`decompress_array`].
pub fn compress_array(array: &Array, compression: Compression) -> crate::Result<Vec<u8>> {
    match compression {
        Compression::Uncompressed => Ok(array.as_bytes().to_vec()),
        Compression::Jpeg | Compression::Png => {
            let layout = image_layout(array, compression)?;
            let mut out = Vec::new();
            let result = match compression {
                Compression::Jpeg => JpegEncoder::new(&mut out).write_image(
                    array.as_bytes(),
                    layout.width,
                    layout.height,
                    layout.color,
                ),
                _ => PngEncoder::new(&mut out).write_image(
                    array.as_bytes(),
                    layout.width,
                    layout.height,
                    layout.color,
                ),
            };
            result.map_err(|e| TenstoreError::SampleCompression {
                shape: array.shape().to_vec(),
                compression,
                message: e.to_string(),
            })?;
            Ok(out)
        }
    }
}

/// Decodes an image buffer into a `u8` array under its natural shape:
/// `(h, w)` for grayscale, `(h, w, c)` otherwise.
pub fn decode_image(buffer: &[u8]) -> crate::Result<Array> {
    let img =
        image::load_from_memory(buffer).map_err(|_| TenstoreError::SampleDecompression)?;
    let (height, width) = (u64::from(img.height()), u64::from(img.width()));
    let (data, shape) = match img {
        DynamicImage::ImageLuma8(img) => (img.into_raw(), vec![height, width]),
        DynamicImage::ImageRgb8(img) => (img.into_raw(), vec![height, width, 3]),
        DynamicImage::ImageRgba8(img) => (img.into_raw(), vec![height, width, 4]),
        _ => return Err(TenstoreError::SampleDecompression),
    };
    Array::from_le_bytes(Dtype::U8, &shape, data)
}

/// Decodes a buffer produced by [`compress_array`] back into an array
/// of the given shape.
///
/// The shape comes from the chunk header, so a grayscale sample stored
/// as `(h, w, 1)` reads back under that exact shape.
pub fn decompress_array(buffer: &[u8], shape: &[u64]) -> crate::Result<Array> {
    decode_image(buffer)?
        .reshape(shape)
        .map_err(|_| TenstoreError::SampleDecompression)
}
