use crate::redis_client::RedisClient;

pub mod seats;

/// Read-through cache in front of the seat store. It only ever shortens
/// reads; every decision about seat state is made by the store.
#[derive(Clone)]
pub struct CacheService {
    redis: RedisClient,
    seat_map_ttl: u64,
}

impl CacheService {
    pub fn new(redis: RedisClient, seat_map_ttl: u64) -> Self {
        Self { redis, seat_map_ttl }
    }
}
