//! Core type definitions for the preprocessing pipeline
//!
//! - [`Series`] / [`SeriesHeader`]: cataloged DICOM acquisitions
//! - [`ImageType`]: Decomposed DICOM ImageType field
//! - [`RoleSpec`] / [`RoleRecord`]: per-role configuration and accumulated outputs
//! - [`CaseBundle`]: the case-scoped aggregate passed through every stage
//! - [`RegMode`], [`GeometricMode`], [`Interpolation`], [`RegistrationState`]
//! - [`TransformHandle`]: reusable reference to a computed transform

mod case;
mod enums;
mod image_type;
mod role;
mod series;
mod transform;

pub use case::{CaseBundle, CaseInfo};
pub use enums::{GeometricMode, Interpolation, RegMode, RegistrationState};
pub use image_type::ImageType;
pub use role::{
    path_or_sentinel, MatchedSeries, PostProcess, RoleRecord, RoleSpec, Selection, NONE_SENTINEL,
};
pub use series::{Series, SeriesHeader};
pub use transform::TransformHandle;
