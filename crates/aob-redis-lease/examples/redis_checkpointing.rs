//! Acquires a session lease for a run, renews it, then releases it, against
//! a live Redis instance.
//!
//! Run with: cargo run -p aob-redis-lease --example redis_checkpointing

use std::time::Duration;

use aob_core::LeaseManager;
use aob_redis_lease::RedisLeaseManager;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let manager = RedisLeaseManager::new("redis://127.0.0.1:6379").await?;

    let correlation_id = "example-run-1";
    let ttl = Duration::from_secs(30);

    let lease = manager.acquire(correlation_id, ttl).await?;
    println!("acquired lease for {correlation_id} with token {}", lease.token);

    let renewed = manager.renew(&lease, ttl).await?;
    println!(
        "renewed lease, new expiry in {:?}",
        renewed.expires_at.saturating_duration_since(std::time::Instant::now())
    );

    manager.release(&renewed).await?;
    println!("released lease for {correlation_id}");

    // A second acquirer can now take the lease; a concurrent attempt before
    // release would have failed with `Error::RunUnavailable`.
    let second = manager.acquire(correlation_id, ttl).await?;
    println!("re-acquired lease with a fresh token {}", second.token);
    manager.release(&second).await?;

    Ok(())
}
