use std::time::Instant;

use anyhow::{Context, Result};

use kiln_lib::cache::{ArtifactCache, CacheConfig, GcOptions};
use kiln_lib::platform::paths;
use kiln_lib::store_lock::{LockMode, StoreLock};

use super::common::GcArgs;
use crate::output::{Mark, OutputFormat, emit_json, field, headline, human_elapsed, human_size};

pub fn cmd_gc(args: &GcArgs, output: OutputFormat) -> Result<()> {
  let start = Instant::now();

  let _lock = StoreLock::acquire(LockMode::Exclusive, "gc").context("Failed to acquire store lock")?;
  let cache = ArtifactCache::open(paths::store_dir(), CacheConfig::default()).context("Failed to open artifact store")?;

  let result = cache
    .collect_garbage(GcOptions {
      max_entries: args.max_entries,
      max_bytes: args.max_size,
      dry_run: args.dry_run,
    })
    .context("Garbage collection failed")?;

  if output.is_json() {
    emit_json(&result)?;
  } else {
    let stats = &result.stats;
    if args.dry_run {
      headline(Mark::Reused, "Dry run, nothing was deleted");
    } else {
      headline(Mark::Done, "Store cleaned");
    }
    field("Artifacts scanned", stats.artifacts_scanned);
    field("Artifacts evicted", stats.artifacts_evicted);
    for id in &result.evicted {
      println!("    {id}");
    }
    field("Incomplete removed", stats.incomplete_removed);
    field("Scratch removed", stats.scratch_removed);
    field(if args.dry_run { "Space reclaimable" } else { "Space freed" }, human_size(stats.bytes_freed));
    field("Duration", human_elapsed(start.elapsed()));
  }

  Ok(())
}
