//! JPEG encoding of the display payload.

use anyhow::{Result, anyhow};
use image::{RgbImage, codecs::jpeg::JpegEncoder};

use crate::capture::RawFrame;

/// Compress a packed-RGB frame into the sample's opaque display payload.
pub(crate) fn encode_frame_jpeg(frame: &RawFrame, quality: i32) -> Result<Vec<u8>> {
    let image =
        RgbImage::from_raw(frame.width, frame.height, frame.data.clone()).ok_or_else(|| {
            anyhow!(
                "frame buffer does not match {}x{} RGB24",
                frame.width,
                frame.height
            )
        })?;

    let mut buffer = Vec::new();
    let quality = quality.clamp(1, 100) as u8;
    JpegEncoder::new_with_quality(&mut buffer, quality)
        .encode_image(&image)
        .map_err(|err| anyhow!("JPEG encode failed: {err}"))?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_payload_is_a_jpeg() {
        let frame = RawFrame {
            data: vec![128u8; 8 * 8 * 3],
            width: 8,
            height: 8,
            timestamp_ms: 0,
        };
        let payload = encode_frame_jpeg(&frame, 50).expect("encode failed");
        assert_eq!(&payload[..2], &[0xff, 0xd8], "missing JPEG magic");
    }

    #[test]
    fn mismatched_buffer_is_rejected() {
        let frame = RawFrame {
            data: vec![0u8; 10],
            width: 8,
            height: 8,
            timestamp_ms: 0,
        };
        assert!(encode_frame_jpeg(&frame, 50).is_err());
    }
}
