//! Source crawlers: fetch, normalize, and filter marketing articles.
//!
//! This crate provides:
//! - [`HttpFetcher`], shared HTTP client with bounded retry and hard deadlines
//! - [`ArticleSource`], the per-kind crawler trait, with [`FeedSource`],
//!   [`SitemapSource`] and [`SocialDiscoverySource`]
//! - [`CrawlerRegistry`], which dispatches by source kind and applies
//!   [`filter_new_articles`]

pub mod dates;
pub mod extract;
pub mod feed;
pub mod fetcher;
pub mod sitemap;
pub mod social;
pub mod source;
pub mod xml;

pub use extract::{PageExtract, extract_article, html_to_text};
pub use feed::{FeedSource, parse_feed};
pub use fetcher::{HttpFetcher, redact_url};
pub use sitemap::{Sitemap, SitemapEntry, SitemapSource, is_article_url, parse_sitemap, select_candidates};
pub use social::{SocialDiscoverySource, caption_title, is_informative_caption};
pub use source::{ArticleSource, CrawlOutcome, CrawlerRegistry, filter_new_articles};
