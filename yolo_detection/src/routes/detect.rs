use crate::{
    detection::DetectionResponse,
    model_service::{ModelError, ModelService},
    routes::DETECT_ROUTE,
    server::SharedState,
};
use axum::{
    body::Bytes,
    extract::{multipart::MultipartError, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use image::{DynamicImage, ImageDecoder};
use std::{io::Cursor, time::Instant};
use thiserror::Error;
use tracing::instrument;

const FILE_FIELD: &str = "file";

#[derive(Error, Debug)]
pub enum DetectError {
    #[error("Invalid multipart body: {0}")]
    Multipart(#[from] MultipartError),
    #[error("Missing `file` field in form data")]
    MissingFile,
    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("Detection failed: {0}")]
    Model(#[from] ModelError),
    #[error("Detection task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl IntoResponse for DetectError {
    fn into_response(self) -> Response {
        let status = match self {
            DetectError::Multipart(_) | DetectError::Decode(_) => StatusCode::BAD_REQUEST,
            DetectError::MissingFile => StatusCode::UNPROCESSABLE_ENTITY,
            DetectError::Model(_) | DetectError::Join(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!("{}", self);
        } else {
            tracing::warn!("{}", self);
        }
        (status, self.to_string()).into_response()
    }
}

/// Decodes `image_data`, rotates it upright per its EXIF orientation, and runs
/// one blocking forward pass over it.
pub fn detect_image(
    model_service: &dyn ModelService,
    image_data: &[u8],
) -> Result<DetectionResponse, DetectError> {
    let image = decode_upright(image_data)?;

    let raw_detections = model_service.detect(&image)?;

    Ok(DetectionResponse::from_raw(
        &raw_detections,
        model_service.class_labels(),
    ))
}

fn decode_upright(image_data: &[u8]) -> Result<DynamicImage, image::ImageError> {
    let mut decoder = image::ImageReader::new(Cursor::new(image_data))
        .with_guessed_format()
        .map_err(image::ImageError::IoError)?
        .into_decoder()?;
    let orientation = decoder.orientation()?;

    let mut image = DynamicImage::from_decoder(decoder)?;
    image.apply_orientation(orientation);
    Ok(image)
}

async fn read_file_field(multipart: &mut Multipart) -> Result<Bytes, DetectError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some(FILE_FIELD) {
            return Ok(field.bytes().await?);
        }
    }
    Err(DetectError::MissingFile)
}

#[instrument(skip(state, multipart))]
pub async fn detect_objects(
    State(state): State<SharedState>,
    mut multipart: Multipart,
) -> Result<Json<DetectionResponse>, DetectError> {
    state.metrics.record_request(DETECT_ROUTE);

    let image_data = read_file_field(&mut multipart).await?;
    tracing::debug!("Received upload of {} bytes", image_data.len());

    let model_service = state.model_service.clone();
    let started = Instant::now();
    let response =
        tokio::task::spawn_blocking(move || detect_image(model_service.as_ref(), &image_data))
            .await??;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    state
        .metrics
        .record_inference_duration(elapsed_ms, DETECT_ROUTE);
    state
        .metrics
        .record_detections(response.detections.len(), DETECT_ROUTE);

    tracing::debug!(
        "Returning {} detections in {} ms",
        response.detections.len(),
        elapsed_ms
    );
    for (i, detection) in response.detections.iter().enumerate() {
        tracing::debug!(
            "Detection {}: class={} ({}), confidence={:.3}, bbox=({:.1}, {:.1}, {:.1}, {:.1})",
            i,
            detection.class_name,
            detection.class_id,
            detection.confidence,
            detection.bbox[0],
            detection.bbox[1],
            detection.bbox[2],
            detection.bbox[3]
        );
    }

    Ok(Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{detection::RawDetection, labels::ClassLabels};
    use image::{ImageBuffer, Rgb};

    struct MockModelService {
        labels: ClassLabels,
    }

    impl ModelService for MockModelService {
        fn detect(&self, image: &DynamicImage) -> Result<Vec<RawDetection>, ModelError> {
            Ok(vec![RawDetection {
                x_min: 0.,
                y_min: 0.,
                x_max: image.width() as f32,
                y_max: image.height() as f32,
                confidence: 0.9,
                class_id: 1,
            }])
        }

        fn class_labels(&self) -> &ClassLabels {
            &self.labels
        }
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(width, height, Rgb([0, 255, 0]));
        let mut cursor = Cursor::new(Vec::new());
        img.write_to(&mut cursor, image::ImageFormat::Png).unwrap();
        cursor.into_inner()
    }

    fn mock() -> MockModelService {
        MockModelService {
            labels: ClassLabels::new(vec!["person".into(), "bicycle".into()]),
        }
    }

    #[test]
    fn test_detect_image() {
        let response = detect_image(&mock(), &png_bytes(120, 80)).unwrap();

        assert_eq!(response.detections.len(), 1);
        assert_eq!(response.detections[0].class_name, "bicycle");
        assert_eq!(response.detections[0].bbox, [0., 0., 120., 80.]);
    }

    /// JPEG carrying an Exif APP1 segment with orientation 6 (rotate 90° clockwise).
    fn rotated_jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(width, height, Rgb([0, 255, 0]));
        let mut cursor = Cursor::new(Vec::new());
        img.write_to(&mut cursor, image::ImageFormat::Jpeg).unwrap();
        let jpeg = cursor.into_inner();

        let mut exif = b"Exif\0\0".to_vec();
        exif.extend_from_slice(b"MM\0\x2a\0\0\0\x08");
        exif.extend_from_slice(&[0x00, 0x01]);
        exif.extend_from_slice(&[0x01, 0x12, 0x00, 0x03, 0x00, 0x00, 0x00, 0x01]);
        exif.extend_from_slice(&[0x00, 0x06, 0x00, 0x00]);
        exif.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);

        let mut out = jpeg[..2].to_vec();
        out.extend_from_slice(&[0xFF, 0xE1]);
        out.extend_from_slice(&((exif.len() + 2) as u16).to_be_bytes());
        out.extend_from_slice(&exif);
        out.extend_from_slice(&jpeg[2..]);
        out
    }

    #[test]
    fn test_detect_image_applies_exif_orientation() {
        let response = detect_image(&mock(), &rotated_jpeg_bytes(40, 20)).unwrap();

        assert_eq!(response.detections.len(), 1);
        assert_eq!(response.detections[0].bbox, [0., 0., 20., 40.]);
    }

    #[test]
    fn test_detect_image_rejects_text() {
        let result = detect_image(&mock(), b"definitely not an image");
        assert!(matches!(result, Err(DetectError::Decode(_))));
    }

    #[test]
    fn test_error_status_codes() {
        let decode = DetectError::Decode(image::ImageError::IoError(std::io::Error::other("x")));
        assert_eq!(decode.into_response().status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            DetectError::MissingFile.into_response().status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            DetectError::Model(ModelError::Inference("boom".into()))
                .into_response()
                .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
