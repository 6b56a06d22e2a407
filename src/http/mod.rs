//! HTTP/1.1 protocol pieces, free of any socket or event-loop policy.
//!
//! - **`parser`**: completeness check and request validation
//! - **`request`**: the parsed request and method set
//! - **`uri`**: percent-decoding, traversal normalisation, query and host checks
//! - **`response`**: status codes and the response builder
//! - **`writer`**: serialisation and resumable buffered sends
//! - **`transfer`**: resumable file streaming with fixed or chunked framing
//! - **`mime`**: content types by file extension
//! - **`multipart`**: `multipart/form-data` splitting
//!
//! # Request lifecycle on one connection
//!
//! ```text
//!        ┌─────────────┐
//!        │   Reading   │ ← bytes accumulate until parser::is_complete
//!        └──────┬──────┘
//!               │ request complete
//!               ▼
//!        ┌──────────────────┐
//!        │   Dispatching    │ ← parse_request + handler, same loop iteration
//!        └──────┬───────────┘
//!               │ Response or TransferState
//!               ▼
//!        ┌──────────────────┐
//!        │ Writing/Streaming│ ← one write per readiness notification
//!        └──────┬───────────┘
//!               │ last byte written
//!               ├─ keep-alive → Reading (buffer cleared)
//!               └─ close → connection dropped
//! ```

pub mod mime;
pub mod multipart;
pub mod parser;
pub mod request;
pub mod response;
pub mod transfer;
pub mod uri;
pub mod writer;
