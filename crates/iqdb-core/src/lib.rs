//! iqdb-core: content-based image retrieval over Haar wavelet signatures
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 ImageDb (query + mutation)                  │
//! │        luminance seed, bucket scoring, bounded top-K        │
//! └─────────────────────────────────────────────────────────────┘
//!          │                    │                    │
//!          ▼                    ▼                    ▼
//! ┌────────────────┐  ┌──────────────────┐  ┌─────────────────┐
//! │   ImageTable   │  │   BucketIndex    │  │   SqliteStore   │
//! │ internal index │  │ (chan,sign,coef) │  │ durable rows +  │
//! │   → record     │  │ → posting list   │  │ signature blobs │
//! └────────────────┘  └──────────────────┘  └─────────────────┘
//! ```
//!
//! Images enter as 128x128 RGB channel planes, are converted to YIQ and
//! Haar-decomposed, and are reduced to a [`HaarSignature`]: the DC
//! luminance triple plus the 40 largest-magnitude coefficient positions
//! per channel. Queries score candidates by shared signature
//! coefficients, weighted by spatial frequency band.

pub mod bucket;
pub mod db;
pub mod error;
pub mod haar;
pub mod signature;
pub mod store;
pub mod table;

pub use db::{ImageDb, Match};
pub use error::{Error, Result};
pub use haar::{NUM_CHANNELS, NUM_COEFS, NUM_PIXELS, NUM_PIXELS_SQUARED};
pub use signature::HaarSignature;
pub use store::PersistedImage;
