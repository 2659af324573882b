// src/api.rs
//
// REST client for the trip backend.
//
//   GET  {base}/api/trips        -> [Trip]
//   GET  {base}/api/trips/:id    -> Trip
//   POST {base}/api/trips        -> Trip
//   PUT  {base}/api/trips/:id    -> Trip   (body without id)
//   GET  {base}/api/patch        -> [Patch]

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;

use crate::error::ApiError;
use crate::models::{Patch, Trip};

pub struct ApiClient {
    http: Client,
    base_url: String,
}

impl ApiClient {
    /// Create a client for the given base URL (scheme and host, no trailing `/api`).
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        let trimmed = base_url.trim().trim_end_matches('/');
        if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
            return Err(ApiError::BaseUrl(base_url.to_string()));
        }

        let http = Client::builder()
            .user_agent(concat!("tripdesk/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|source| ApiError::Request {
                url: trimmed.to_string(),
                source,
            })?;

        Ok(Self {
            http,
            base_url: trimmed.to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn list_trips(&self) -> Result<Vec<Trip>, ApiError> {
        let url = self.url("/api/trips");
        self.send(self.http.get(&url), &url, "Failed to fetch trips")
            .await
    }

    pub async fn get_trip(&self, id: i64) -> Result<Trip, ApiError> {
        let url = self.url(&format!("/api/trips/{}", id));
        self.send(self.http.get(&url), &url, "Failed to fetch trip")
            .await
    }

    pub async fn create_trip(&self, trip: &Trip) -> Result<Trip, ApiError> {
        let url = self.url("/api/trips");
        self.send(self.http.post(&url).json(trip), &url, "Failed to save trip")
            .await
    }

    pub async fn update_trip(&self, id: i64, trip: &Trip) -> Result<Trip, ApiError> {
        let url = self.url(&format!("/api/trips/{}", id));
        self.send(
            self.http.put(&url).json(&trip.update_body()),
            &url,
            "Failed to save trip",
        )
        .await
    }

    pub async fn list_patches(&self) -> Result<Vec<Patch>, ApiError> {
        let url = self.url("/api/patch");
        self.send(self.http.get(&url), &url, "Failed to fetch patches")
            .await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        url: &str,
        context: &str,
    ) -> Result<T, ApiError> {
        let response = request.send().await.map_err(|source| ApiError::Request {
            url: url.to_string(),
            source,
        })?;

        let status = response.status();
        if !status.is_success() {
            tlog!("[api] {} {} -> {}", context, url, status);
            return Err(ApiError::Status {
                status,
                context: context.to_string(),
            });
        }

        response.json::<T>().await.map_err(|source| ApiError::Decode {
            url: url.to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Timestamp, TripStatus};
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_trip() -> serde_json::Value {
        serde_json::json!({
            "id": 1,
            "expected_start_time": "1234",
            "actual_start_time": "1234",
            "status": "CREATED",
            "stops": [{
                "id": 1, "trip_id": 1, "name": "Warehouse A", "sequence": 1,
                "tasks": [{ "id": 1, "stop_id": 1, "task_type": "LOAD", "sequence": 1, "task_name": "" }]
            }]
        })
    }

    #[test]
    fn test_rejects_base_url_without_scheme() {
        assert!(matches!(
            ApiClient::new("localhost:8080"),
            Err(ApiError::BaseUrl(_))
        ));
        let client = ApiClient::new("http://localhost:8080/").unwrap();
        assert_eq!(client.base_url(), "http://localhost:8080");
    }

    #[tokio::test]
    async fn test_list_trips() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/trips"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([sample_trip()])))
            .mount(&server)
            .await;

        let client = ApiClient::new(&server.uri()).unwrap();
        let trips = client.list_trips().await.unwrap();
        assert_eq!(trips.len(), 1);
        assert_eq!(trips[0].stops[0].name, "Warehouse A");
    }

    #[tokio::test]
    async fn test_get_trip_not_found_is_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/trips/99"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = ApiClient::new(&server.uri()).unwrap();
        match client.get_trip(99).await {
            Err(ApiError::Status { status, context }) => {
                assert_eq!(status.as_u16(), 404);
                assert_eq!(context, "Failed to fetch trip");
            }
            other => panic!("expected status error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_update_trip_sends_body_without_id() {
        let server = MockServer::start().await;
        let mut expected = sample_trip();
        expected.as_object_mut().unwrap().remove("id");

        Mock::given(method("PUT"))
            .and(path("/api/trips/1"))
            .and(body_json(expected))
            .respond_with(ResponseTemplate::new(200).set_body_json(sample_trip()))
            .expect(1)
            .mount(&server)
            .await;

        let client = ApiClient::new(&server.uri()).unwrap();
        let trip: Trip = serde_json::from_value(sample_trip()).unwrap();
        let saved = client.update_trip(1, &trip).await.unwrap();
        assert_eq!(saved.id, 1);
    }

    #[tokio::test]
    async fn test_create_trip_posts_full_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/trips"))
            .respond_with(ResponseTemplate::new(201).set_body_json(sample_trip()))
            .expect(1)
            .mount(&server)
            .await;

        let client = ApiClient::new(&server.uri()).unwrap();
        let mut trip = Trip::draft();
        trip.expected_start_time = Timestamp::Millis(1);
        let saved = client.create_trip(&trip).await.unwrap();
        assert_eq!(saved.status, TripStatus::Created);
    }

    #[tokio::test]
    async fn test_list_patches_bad_json_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/patch"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let client = ApiClient::new(&server.uri()).unwrap();
        assert!(matches!(
            client.list_patches().await,
            Err(ApiError::Decode { .. })
        ));
    }
}
