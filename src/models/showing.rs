use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use super::{MovieId, ShowingId};

/// A scheduled screening. `(movie_id, hall, date, time)` is unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Showing {
    pub id: ShowingId,
    pub movie_id: MovieId,
    pub cinema: String,
    pub hall: String,
    pub date: NaiveDate,
    pub time: String,
    pub created_at: DateTime<Utc>,
}

impl Showing {
    pub fn coordinates(&self) -> ShowingCoordinates {
        ShowingCoordinates {
            movie_id: self.movie_id,
            hall: self.hall.clone(),
            date: self.date,
            time: self.time.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewShowing {
    #[validate(range(min = 1))]
    pub movie_id: MovieId,
    #[validate(length(min = 1, max = 64))]
    pub cinema: String,
    #[validate(length(min = 1, max = 64))]
    pub hall: String,
    pub date: NaiveDate,
    #[validate(custom(function = "validate_show_time"))]
    pub time: String,
}

/// Criteria for listing showings. Unset fields match everything.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct ShowingFilter {
    #[validate(range(min = 1))]
    pub movie_id: Option<MovieId>,
    #[validate(length(min = 1, max = 64))]
    pub cinema: Option<String>,
}

impl ShowingFilter {
    pub fn matches(&self, showing: &Showing) -> bool {
        self.movie_id.map_or(true, |id| showing.movie_id == id)
            && self.cinema.as_deref().map_or(true, |c| showing.cinema == c)
    }
}

/// The lookup key used by the ticket flow, which addresses a showing by what
/// is printed on the ticket rather than by id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Validate)]
pub struct ShowingCoordinates {
    #[validate(range(min = 1))]
    pub movie_id: MovieId,
    #[validate(length(min = 1, max = 64))]
    pub hall: String,
    pub date: NaiveDate,
    #[validate(custom(function = "validate_show_time"))]
    pub time: String,
}

pub(crate) fn validate_show_time(time: &str) -> Result<(), ValidationError> {
    NaiveTime::parse_from_str(time, "%H:%M")
        .map(|_| ())
        .map_err(|_| ValidationError::new("show_time"))
}
