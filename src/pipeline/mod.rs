//! Pipeline stages shared by the controller and the services.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ (geometry) ──▶ encode ──▶ llm ──▶ sanitize
//! (path/URL)  (crop)       (bytes)    (VLM)   (cleanup)
//! ```
//!
//! 1. [`input`]: resolve a path, URL or buffer to a decoded image
//! 2. [`encode`]: encode a rasterised surface in the source's format and
//!    wrap it for the multimodal API request body
//! 3. [`llm`]: drive one LLM call with timeout and retry/backoff; the
//!    only stage with network I/O besides URL download
//! 4. [`sanitize`]: deterministic cleanup of model replies

pub mod encode;
pub mod input;
pub mod llm;
pub mod sanitize;
