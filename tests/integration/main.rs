//! End-to-end engine tests against scripted sources and backends.

mod mock_feed;
mod pipeline;
