//! Streaming side of the zlib codec: a `BufRead` wrapper that inflates while
//! tracking a running hash, for callers that need to re-derive an object's
//! hash as it streams off disk instead of buffering the whole payload.

pub mod inflate;
