//! Enrollment: one captured frame plus operator details → a new identity.

use crate::detector::{DetectorError, FaceLocator};
use crate::store::{GalleryStore, SampleStore, StoreError};
use crate::types::{FaceSample, Identity};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("no face detected in the captured frame")]
    NoFaceDetected,
    #[error("employee id already enrolled: {0}")]
    DuplicateIdentity(String),
    #[error("face detection failed: {0}")]
    Detection(#[from] DetectorError),
    #[error("persistence failed: {0}")]
    Persistence(StoreError),
}

impl From<StoreError> for EnrollError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate(id) => EnrollError::DuplicateIdentity(id),
            other => EnrollError::Persistence(other),
        }
    }
}

/// Operator-supplied identity details. Validated by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrollRequest {
    pub employee_id: String,
    pub name: String,
    pub department: String,
}

/// Enroll the first face found in `frame`.
///
/// The cropped face is stored as a new sample artifact before the identity
/// row is inserted. If the insert fails the artifact is discarded, so a
/// rejected enrollment leaves neither a row nor an orphaned sample.
pub fn enroll(
    locator: &mut dyn FaceLocator,
    identities: &dyn GalleryStore,
    samples: &dyn SampleStore,
    request: EnrollRequest,
    frame: &FaceSample,
) -> Result<Identity, EnrollError> {
    let regions = locator.locate(frame)?;
    let region = regions.first().ok_or(EnrollError::NoFaceDetected)?;

    tracing::debug!(
        employee_id = %request.employee_id,
        faces = regions.len(),
        x = region.x,
        y = region.y,
        width = region.width,
        height = region.height,
        "enroll: using first detected face"
    );

    let crop = region.crop(frame);
    let reference_sample = samples.save(&request.employee_id, &crop)?;

    let identity = Identity {
        employee_id: request.employee_id,
        name: request.name,
        department: request.department,
        reference_sample,
    };

    if let Err(err) = identities.insert_identity(&identity) {
        if let Err(discard_err) = samples.discard(&identity.reference_sample) {
            tracing::warn!(
                sample = %identity.reference_sample,
                error = %discard_err,
                "failed to discard sample of rejected enrollment"
            );
        }
        return Err(err.into());
    }

    tracing::info!(
        employee_id = %identity.employee_id,
        name = %identity.name,
        department = %identity.department,
        sample = %identity.reference_sample,
        "identity enrolled"
    );
    Ok(identity)
}
