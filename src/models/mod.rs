mod url;

pub use url::{
    BatchItem, BatchResult, ShortenRequest, ShortenResponse, ShortenedUrl, Stats, UserUrl,
};
