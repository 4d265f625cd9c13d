//! PNG compression of rendered pages

use std::io::Cursor;

use image::{ImageFormat, RgbImage, imageops};

use super::error::RenderFault;
use super::types::{CompressedPage, PagePart};

/// Keep only the requested part of a rendered page.
#[must_use]
pub fn crop_part(image: RgbImage, part: PagePart) -> RgbImage {
    let (width, height) = image.dimensions();
    let half = width / 2;
    match part {
        PagePart::Full => image,
        PagePart::LeftHalf => imageops::crop_imm(&image, 0, 0, half, height).to_image(),
        PagePart::RightHalf => {
            imageops::crop_imm(&image, half, 0, width - half, height).to_image()
        }
    }
}

/// Crop and compress a rendered bitmap for storage.
pub fn encode_page(
    page: usize,
    image: RgbImage,
    part: PagePart,
) -> Result<CompressedPage, RenderFault> {
    if image.width() == 0 || image.height() == 0 {
        return Err(RenderFault::EmptyImage { page });
    }
    let image = crop_part(image, part);
    if image.width() == 0 {
        return Err(RenderFault::EmptyImage { page });
    }

    let mut png = Vec::new();
    image.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;

    Ok(CompressedPage::new(page, image.width(), image.height(), png))
}

/// Decompress a stored page.
pub fn decode_page(page: &CompressedPage) -> Result<RgbImage, RenderFault> {
    let image = image::load_from_memory_with_format(page.bytes(), ImageFormat::Png)?;
    Ok(image.to_rgb8())
}

#[cfg(test)]
mod tests {
    use image::Rgb;

    use super::*;

    fn striped(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, _| {
            if x < width / 2 {
                Rgb([255, 0, 0])
            } else {
                Rgb([0, 0, 255])
            }
        })
    }

    #[test]
    fn encoded_page_decodes_to_same_pixels() {
        let image = striped(16, 8);
        let encoded = encode_page(3, image.clone(), PagePart::Full).unwrap();

        assert_eq!(encoded.page, 3);
        assert_eq!((encoded.width_px, encoded.height_px), (16, 8));
        assert!(encoded.size_bytes() > 0);
        assert_eq!(decode_page(&encoded).unwrap(), image);
    }

    #[test]
    fn halves_keep_their_side() {
        let left = encode_page(0, striped(16, 8), PagePart::LeftHalf).unwrap();
        let right = encode_page(0, striped(16, 8), PagePart::RightHalf).unwrap();

        let left = decode_page(&left).unwrap();
        let right = decode_page(&right).unwrap();
        assert_eq!(left.dimensions(), (8, 8));
        assert_eq!(right.dimensions(), (8, 8));
        assert!(left.pixels().all(|p| *p == Rgb([255, 0, 0])));
        assert!(right.pixels().all(|p| *p == Rgb([0, 0, 255])));
    }

    #[test]
    fn empty_image_is_rejected() {
        let err = encode_page(7, RgbImage::new(0, 0), PagePart::Full).unwrap_err();
        assert!(matches!(err, RenderFault::EmptyImage { page: 7 }));

        let err = encode_page(7, RgbImage::new(1, 4), PagePart::LeftHalf).unwrap_err();
        assert!(matches!(err, RenderFault::EmptyImage { page: 7 }));
    }
}
