mod fetcher;
mod resolver;

pub use fetcher::{FetchConfig, FetchError, FetchOutcome, FetchedImage, OriginFetcher};
pub use resolver::{OriginResolver, ResolveError, select_candidate};
