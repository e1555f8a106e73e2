//! The UI-agnostic application-state layer for the `etchr` disk imaging utility.
//!
//! `etchr-model` sits between a front-end (a CLI, a GUI) and the code that
//! actually moves bytes. It answers two questions for the front-end: "can this
//! file be flashed?" and "where is the running flash at?".
//!
//! The library is structured into several key modules:
//! - [`formats`]: The format classifier. Decides from a path alone whether a file
//!   is a flashable image, unwrapping compression layers, and provides the
//!   heuristics used to warn about Windows images and missing partition tables.
//! - [`image`]: The [`ImageMetadata`] record the classifier reads.
//! - [`inspect`]: Fills in [`ImageMetadata`] from a file on disk, including its MBR.
//! - [`store`]: The flashing state store. A guarded state machine that rejects
//!   out-of-range progress values instead of clamping them.
//! - [`error`]: The error type shared by the store and the inspector.
//!
//! ## Example: Checking an Image and Tracking a Flash
//!
//! ```rust,no_run
//! use etchr_model::{Action, FlashStage, FlashState, Store, SupportedFormats};
//! use std::path::Path;
//!
//! fn main() -> etchr_model::Result<()> {
//!     let image = etchr_model::inspect::inspect(Path::new("path/to/image.img.xz"))?;
//!     let formats = SupportedFormats::default();
//!
//!     if !formats.is_supported_image(&image) {
//!         println!("Not a flashable image.");
//!         return Ok(());
//!     }
//!     if etchr_model::formats::missing_partition_table(&image) {
//!         println!("This image may not be bootable.");
//!     }
//!
//!     let store = Store::new();
//!     store.dispatch(Action::SetFlashingFlag)?;
//!
//!     // A writer would report progress like this as it goes.
//!     let state = store.dispatch(Action::SetFlashState(FlashState::new(FlashStage::Write, 42.0)))?;
//!     println!("{:?}", state.flash_state);
//!
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod formats;
pub mod image;
pub mod inspect;
pub mod store;

pub use error::{Error, Result};
pub use formats::{Category, FileType, SupportedFormats};
pub use image::{ImageMetadata, Mbr, MbrPartition};
pub use store::{Action, FlashResults, FlashStage, FlashState, Snapshot, Store};
