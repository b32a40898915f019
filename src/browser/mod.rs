//! chromiumoxide adapters for the listing surface and detail pages

mod driver;
mod fetcher;
mod session;

pub use driver::{ChromiumSurfaceDriver, SurfaceSelectors};
pub use fetcher::{ChromiumDetailFetcher, DetailSelectors};
pub use session::BrowserSession;
