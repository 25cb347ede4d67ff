//! Startup banner.

use std::fmt::Write;
use std::net::SocketAddr;

use slab_cache::SlabCacheConfig;

use crate::config::format_size;

/// What the banner reports.
pub struct BannerConfig<'a> {
    pub version: &'a str,
    pub workers: usize,
    pub listeners: &'a [SocketAddr],
    pub cache: &'a SlabCacheConfig,
}

/// Render the banner.
pub fn banner(config: &BannerConfig) -> String {
    let mut output = String::with_capacity(512);
    let title = format!("slabcached v{}", config.version);
    let _ = writeln!(output, "{}", title);
    let _ = writeln!(output, "{}", "=".repeat(title.len()));
    let _ = writeln!(output);
    let _ = writeln!(output, "Workers:     {}", config.workers);
    let _ = writeln!(output, "Listeners:");
    for address in config.listeners {
        let _ = writeln!(output, "  memcache: {}", address);
    }
    let _ = writeln!(output);

    let cache = config.cache;
    let _ = writeln!(output, "Cache Config:");
    let _ = writeln!(output, "  Memory:    {}", format_size(cache.memory_limit()));
    let _ = writeln!(
        output,
        "  Regions:   {} x {}",
        cache.region_count(),
        format_size(cache.effective_region_size())
    );
    let _ = writeln!(output, "  Buckets:   {}", cache.buckets());
    let _ = writeln!(output, "  Max item:  {}", format_size(cache.max_item_size));
    let _ = writeln!(output, "  Hugepages: {:?}", cache.hugepage_size);
    output
}

/// Print the banner to stdout.
pub fn print_banner(config: &BannerConfig) {
    print!("{}", banner(config));
}
