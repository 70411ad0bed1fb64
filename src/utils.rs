use chrono::{NaiveDateTime, SecondsFormat, TimeZone, Utc};
use rocket::http::Status;
use rocket::request::Request;
use rocket::response::{self, Responder, Response};
use rocket::serde::json::Json;
use serde::{Serialize, Serializer};
use serde_json::Value;

pub fn try_respond<'r, 'o: 'r>(
    req: &'r Request<'_>,
    json: Value,
    status: Status,
) -> response::Result<'o> {
    let resp = Json(json).respond_to(req)?;
    Response::build_from(resp).status(status).ok()
}

/// Timestamps are stored as naive UTC, they go out as RFC 3339.
pub fn serialize_date<S>(date: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let s = Utc
        .from_utc_datetime(date)
        .to_rfc3339_opts(SecondsFormat::Millis, true);
    serializer.serialize_str(&s)
}

pub fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

/// Splits `count` objects into pages of `per_page`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paginator {
    count: i64,
    per_page: i64,
}

impl Paginator {
    pub fn new(count: i64, per_page: i64) -> Self {
        Paginator {
            count,
            per_page: per_page.max(1),
        }
    }

    pub fn num_pages(&self) -> i64 {
        if self.count == 0 {
            1
        } else {
            (self.count + self.per_page - 1) / self.per_page
        }
    }

    /// Resolves a raw `?page=` value. Garbage or a missing value means the
    /// first page, anything out of range means the last one.
    pub fn page_number(&self, raw: Option<&str>) -> i64 {
        let number = match raw.and_then(parse_page_number) {
            Some(number) => number,
            None => return 1,
        };
        if number < 1 || number > self.num_pages() {
            self.num_pages()
        } else {
            number
        }
    }

    pub fn offset(&self, number: i64) -> i64 {
        (number - 1) * self.per_page
    }

    pub fn limit(&self) -> i64 {
        self.per_page
    }

    pub fn page<T>(&self, number: i64, items: Vec<T>) -> Page<T> {
        let num_pages = self.num_pages();
        Page {
            items,
            number,
            num_pages,
            count: self.count,
            has_next: number < num_pages,
            has_previous: number > 1,
            next_page_number: if number < num_pages { Some(number + 1) } else { None },
            previous_page_number: if number > 1 { Some(number - 1) } else { None },
        }
    }
}

fn parse_page_number(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    raw.parse::<i64>().ok().or_else(|| {
        raw.parse::<f64>()
            .ok()
            .filter(|n| n.is_finite() && n.fract() == 0.0)
            .map(|n| n as i64)
    })
}

#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub number: i64,
    pub num_pages: i64,
    pub count: i64,
    pub has_next: bool,
    pub has_previous: bool,
    pub next_page_number: Option<i64>,
    pub previous_page_number: Option<i64>,
}
