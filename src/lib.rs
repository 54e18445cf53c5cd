/*!
# Overview
s3mirror is a high-throughput synchronization and copy tool for S3-compatible
object stores.

It can synchronize a local directory with a bucket, a bucket with a local
directory, or two buckets with each other, and it can copy single objects
between buckets through a local staging area when the two sides live in
different regions or behind different endpoints (client-side copy).

## Features
- Incremental transfer
  Three pluggable decision strategies choose whether an object pair needs a
  transfer: size only, size and modification time (default), or hash
  (ETag/MD5) and size.

- Parallel
  A worker pool of configurable size (`--numworkers`, default 256) executes
  the generated plan items concurrently; listers, differ and planner run as
  independent producers over bounded channels.

- Bandwidth limiting
  A process-wide token bucket enforces a configured byte/sec ceiling over
  every read and write stream (`--bandwidth-limit 50MB/s`, `100Mbps`, ...).

- Resilient
  Transient transport and throttling failures are retried with exponential
  backoff and jitter; a single Ctrl-C cancels every in-flight wait promptly.

## As a library
The s3mirror CLI is a thin wrapper over this library. A typical embedding
parses CLI-style arguments into a [`Config`], builds a
[`pipeline::Pipeline`], and runs it with a cancellation token:

```no_run
use s3mirror::Config;
use s3mirror::config::args::parse_from_args;
use s3mirror::pipeline::Pipeline;
use s3mirror::types::token::create_pipeline_cancellation_token;

#[tokio::main]
async fn main() {
    let args = vec!["s3mirror", "sync", "s3://source-bucket/", "s3://target-bucket/"];
    let config = Config::try_from(parse_from_args(args).unwrap()).unwrap();

    let cancellation_token = create_pipeline_cancellation_token();
    let mut pipeline = Pipeline::new(config, cancellation_token).await;
    pipeline.run().await;

    if pipeline.has_error() {
        eprintln!("{:?}", pipeline.get_errors_and_consume().unwrap()[0]);
    }
}
```
*/

pub use config::Config;
pub use config::args::CLIArgs;

pub mod config;
pub mod pipeline;
pub mod storage;
pub mod transfer;
pub mod types;
