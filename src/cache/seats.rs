use redis::AsyncCommands;
use tracing::{debug, warn};

use crate::cache::CacheService;
use crate::error::BookingResult;
use crate::inventory::SeatInventory;
use crate::models::{Seat, ShowingId};

fn seats_key(showing_id: ShowingId) -> String {
    format!("seats:{}", showing_id)
}

impl CacheService {
    // Получить карту мест сеанса: сначала кеш, потом хранилище
    pub async fn get_seats(
        &self,
        showing_id: ShowingId,
        inventory: &SeatInventory,
    ) -> BookingResult<Vec<Seat>> {
        if let Ok(seats) = self.get_seats_from_cache(showing_id).await {
            debug!("Seat map of showing {} served from cache", showing_id);
            // Истёкшие холды пересчитываем на каждом чтении, кеш хранит сырое состояние
            return Ok(inventory.effective_seats(seats));
        }

        let seats = inventory.stored_seats(showing_id).await?;
        if !seats.is_empty() {
            if let Err(e) = self.save_seats_to_cache(showing_id, &seats).await {
                warn!("Failed to cache seat map of showing {}: {}", showing_id, e);
            }
        }
        Ok(inventory.effective_seats(seats))
    }

    // Сбросить кеш после любого изменения мест
    pub async fn invalidate_seats(&self, showing_id: ShowingId) {
        let mut conn = self.redis.conn.clone();
        if let Err(e) = conn.del::<_, ()>(seats_key(showing_id)).await {
            warn!("Failed to invalidate seat map of showing {}: {}", showing_id, e);
        }
    }

    // === Работа с кешем ===
    async fn get_seats_from_cache(&self, showing_id: ShowingId) -> Result<Vec<Seat>, redis::RedisError> {
        let mut conn = self.redis.conn.clone();
        let data: String = conn.get(seats_key(showing_id)).await?;
        serde_json::from_str(&data)
            .map_err(|_| redis::RedisError::from((redis::ErrorKind::TypeError, "Parse error")))
    }

    async fn save_seats_to_cache(&self, showing_id: ShowingId, seats: &[Seat]) -> Result<(), redis::RedisError> {
        let data = serde_json::to_string(seats)
            .map_err(|_| redis::RedisError::from((redis::ErrorKind::TypeError, "Serialize error")))?;
        let mut conn = self.redis.conn.clone();
        conn.set_ex(seats_key(showing_id), data, self.seat_map_ttl).await
    }
}
