//! The person domain: typed collaborators, validation and traced CRUD
//! operations.

use crate::telemetry::{SpanOptions, Telemetry};
use async_trait::async_trait;
use constellation_telemetry::metrics::{Counter, Histogram, Meter};
use constellation_telemetry::trace::SpanKind;
use constellation_telemetry::KeyValue;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use thiserror::Error;

/// Queue topic the create flow publishes to.
pub const CREATE_PERSON_TOPIC: &str = "person/create-person";

/// A stored person.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    /// Store-assigned identifier.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Age in years.
    pub age: i32,
}

/// Input for [`PersonService::create`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreatePersonInput {
    /// Display name; must be non-empty.
    pub name: String,
    /// Age in years; must be non-negative.
    pub age: i32,
}

impl CreatePersonInput {
    /// Rejects inputs before any collaborator is touched.
    pub fn validate(&self) -> Result<(), PersonError> {
        if self.name.trim().is_empty() {
            return Err(PersonError::Validation("name must not be empty".into()));
        }
        if self.age < 0 {
            return Err(PersonError::Validation("age must not be negative".into()));
        }
        Ok(())
    }
}

/// Business errors. Re-raised to the caller unchanged; the telemetry layer
/// only observes them.
#[derive(Error, Debug)]
pub enum PersonError {
    /// The input failed validation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// No person with the requested id exists.
    #[error("person {0} not found")]
    NotFound(i64),

    /// The store collaborator failed.
    #[error("store failure: {0}")]
    Store(String),

    /// The queue collaborator failed.
    #[error("queue failure: {0}")]
    Queue(String),
}

/// Persistence collaborator.
#[async_trait]
pub trait PersonStore: Send + Sync {
    /// Persists a validated person, assigning its id.
    async fn create(&self, input: CreatePersonInput) -> Result<Person, PersonError>;

    /// All stored people.
    async fn find_all(&self) -> Result<Vec<Person>, PersonError>;

    /// One person by id, if present.
    async fn find_by_id(&self, id: i64) -> Result<Option<Person>, PersonError>;
}

/// A handle to an enqueued job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobHandle {
    /// Queue-assigned job id.
    pub id: u64,
    /// The topic the job was published to.
    pub topic: String,
}

/// Queue collaborator.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Publishes a payload to a topic.
    async fn enqueue(&self, topic: &str, payload: serde_json::Value)
        -> Result<JobHandle, PersonError>;
}

/// Mutex-backed [`PersonStore`] for tests and the demo binary.
#[derive(Debug, Default)]
pub struct InMemoryPersonStore {
    people: Mutex<Vec<Person>>,
    next_id: AtomicI64,
}

#[async_trait]
impl PersonStore for InMemoryPersonStore {
    async fn create(&self, input: CreatePersonInput) -> Result<Person, PersonError> {
        let person = Person {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            name: input.name,
            age: input.age,
        };
        self.people
            .lock()
            .map_err(|err| PersonError::Store(err.to_string()))?
            .push(person.clone());
        Ok(person)
    }

    async fn find_all(&self) -> Result<Vec<Person>, PersonError> {
        Ok(self
            .people
            .lock()
            .map_err(|err| PersonError::Store(err.to_string()))?
            .clone())
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Person>, PersonError> {
        Ok(self
            .people
            .lock()
            .map_err(|err| PersonError::Store(err.to_string()))?
            .iter()
            .find(|person| person.id == id)
            .cloned())
    }
}

/// Vec-backed [`JobQueue`] for tests and the demo binary.
#[derive(Debug, Default)]
pub struct InMemoryJobQueue {
    jobs: Mutex<Vec<(String, serde_json::Value)>>,
    next_id: AtomicU64,
}

impl InMemoryJobQueue {
    /// Everything enqueued so far, in order.
    pub fn enqueued(&self) -> Vec<(String, serde_json::Value)> {
        self.jobs.lock().map(|jobs| jobs.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(
        &self,
        topic: &str,
        payload: serde_json::Value,
    ) -> Result<JobHandle, PersonError> {
        self.jobs
            .lock()
            .map_err(|err| PersonError::Queue(err.to_string()))?
            .push((topic.to_string(), payload));
        Ok(JobHandle {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            topic: topic.to_string(),
        })
    }
}

/// Traced person operations.
///
/// Each operation runs under a server-kind root span, with client-kind
/// children around store calls and a producer-kind child around queue
/// hand-off. A request counter and a duration histogram are recorded per
/// operation, tagged with the operation name and outcome.
pub struct PersonService<S, Q> {
    store: Arc<S>,
    queue: Arc<Q>,
    telemetry: Telemetry,
    operations: Counter,
    duration: Histogram,
}

impl<S, Q> Clone for PersonService<S, Q> {
    fn clone(&self) -> Self {
        PersonService {
            store: self.store.clone(),
            queue: self.queue.clone(),
            telemetry: self.telemetry.clone(),
            operations: self.operations.clone(),
            duration: self.duration.clone(),
        }
    }
}

impl<S, Q> std::fmt::Debug for PersonService<S, Q> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersonService").finish_non_exhaustive()
    }
}

impl<S: PersonStore, Q: JobQueue> PersonService<S, Q> {
    /// Wires the service to its collaborators and instruments.
    pub fn new(store: Arc<S>, queue: Arc<Q>, telemetry: Telemetry, meter: &Meter) -> Self {
        PersonService {
            store,
            queue,
            telemetry,
            operations: meter.u64_counter("person.operations", "{operation}"),
            duration: meter.f64_histogram("person.operation.duration", "ms"),
        }
    }

    /// Lists all people.
    pub async fn find_all(&self) -> Result<Vec<Person>, PersonError> {
        let started = Instant::now();
        let result = self
            .telemetry
            .with_span(
                "person.find_all",
                SpanOptions::of_kind(SpanKind::Server),
                async {
                    log::info!("listing people");
                    let people = self
                        .telemetry
                        .with_span(
                            "store.find_all",
                            SpanOptions::of_kind(SpanKind::Client),
                            self.store.find_all(),
                        )
                        .await?;
                    self.telemetry
                        .add_attributes([KeyValue::new("person.count", people.len() as i64)]);
                    Ok(people)
                },
            )
            .await;
        self.record_operation("find_all", started, &result);
        result
    }

    /// Fetches one person; absence is a [`PersonError::NotFound`] business
    /// error, recorded on the span and re-raised.
    pub async fn find_one(&self, id: i64) -> Result<Person, PersonError> {
        let started = Instant::now();
        let result = self
            .telemetry
            .with_span(
                "person.find_one",
                SpanOptions::of_kind(SpanKind::Server)
                    .with_attribute(KeyValue::new("person.id", id)),
                async {
                    log::info!("fetching person {id}");
                    let found = self
                        .telemetry
                        .with_span(
                            "store.find_by_id",
                            SpanOptions::of_kind(SpanKind::Client),
                            self.store.find_by_id(id),
                        )
                        .await?;
                    found.ok_or(PersonError::NotFound(id))
                },
            )
            .await;
        self.record_operation("find_one", started, &result);
        result
    }

    /// Validates and persists a person, then queues the create-person job.
    pub async fn create(&self, input: CreatePersonInput) -> Result<Person, PersonError> {
        let started = Instant::now();
        let result = self
            .telemetry
            .with_span(
                "person.create",
                SpanOptions::of_kind(SpanKind::Server)
                    .with_attribute(KeyValue::new("person.name", input.name.clone())),
                async {
                    input.validate()?;
                    log::info!("creating person {:?}", input.name);
                    let person = self
                        .telemetry
                        .with_span(
                            "store.create",
                            SpanOptions::of_kind(SpanKind::Client),
                            self.store.create(input.clone()),
                        )
                        .await?;

                    let payload = serde_json::to_value(&person)
                        .map_err(|err| PersonError::Queue(err.to_string()))?;
                    let handle = self
                        .telemetry
                        .with_span(
                            "queue.enqueue",
                            SpanOptions::of_kind(SpanKind::Producer)
                                .with_attribute(KeyValue::new("queue.topic", CREATE_PERSON_TOPIC)),
                            self.queue.enqueue(CREATE_PERSON_TOPIC, payload),
                        )
                        .await?;

                    log::info!("queued job {} for person {}", handle.id, person.id);
                    self.telemetry
                        .add_attributes([KeyValue::new("person.id", person.id)]);
                    Ok(person)
                },
            )
            .await;
        self.record_operation("create", started, &result);
        result
    }

    fn record_operation<T>(
        &self,
        operation: &'static str,
        started: Instant,
        result: &Result<T, PersonError>,
    ) {
        let outcome = if result.is_ok() { "ok" } else { "error" };
        let attributes = [
            KeyValue::new("operation", operation),
            KeyValue::new("outcome", outcome),
        ];
        self.operations.add(1, &attributes);
        self.duration
            .record(started.elapsed().as_secs_f64() * 1000.0, &attributes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use constellation_telemetry::metrics::{MeterProvider, MetricData};
    use constellation_telemetry::testing::InMemorySpanExporter;
    use constellation_telemetry::trace::{Status, TracerProvider};

    struct Harness {
        service: PersonService<InMemoryPersonStore, InMemoryJobQueue>,
        queue: Arc<InMemoryJobQueue>,
        spans: InMemorySpanExporter,
        meter_provider: MeterProvider,
    }

    fn harness() -> Harness {
        let spans = InMemorySpanExporter::default();
        let tracer_provider = TracerProvider::builder()
            .with_simple_exporter(spans.clone())
            .build();
        let meter_provider = MeterProvider::builder().build();
        let queue = Arc::new(InMemoryJobQueue::default());
        let service = PersonService::new(
            Arc::new(InMemoryPersonStore::default()),
            queue.clone(),
            Telemetry::new(tracer_provider.tracer("person")),
            &meter_provider.meter("person"),
        );
        Harness {
            service,
            queue,
            spans,
            meter_provider,
        }
    }

    fn input(name: &str, age: i32) -> CreatePersonInput {
        CreatePersonInput {
            name: name.to_string(),
            age,
        }
    }

    #[tokio::test]
    async fn create_produces_three_spans_in_one_trace() {
        let h = harness();
        let person = h.service.create(input("Ada", 36)).await.unwrap();
        assert_eq!(person.id, 1);

        let spans = h.spans.get_finished_spans();
        assert_eq!(spans.len(), 3);
        let root = spans.iter().find(|s| s.name == "person.create").unwrap();
        let store = spans.iter().find(|s| s.name == "store.create").unwrap();
        let queue = spans.iter().find(|s| s.name == "queue.enqueue").unwrap();

        assert_eq!(root.kind, SpanKind::Server);
        assert_eq!(store.kind, SpanKind::Client);
        assert_eq!(queue.kind, SpanKind::Producer);
        for child in [store, queue] {
            assert_eq!(child.parent_span_id, Some(root.span_context.span_id()));
            assert_eq!(child.span_context.trace_id(), root.span_context.trace_id());
        }
        assert!(queue
            .attributes
            .contains(&KeyValue::new("queue.topic", CREATE_PERSON_TOPIC)));
    }

    #[tokio::test]
    async fn create_enqueues_the_person_payload() {
        let h = harness();
        let person = h.service.create(input("Ada", 36)).await.unwrap();

        let jobs = h.queue.enqueued();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].0, CREATE_PERSON_TOPIC);
        assert_eq!(jobs[0].1, serde_json::to_value(&person).unwrap());
    }

    #[tokio::test]
    async fn invalid_input_never_reaches_the_store() {
        let h = harness();
        let err = h.service.create(input("  ", 30)).await.unwrap_err();
        assert!(matches!(err, PersonError::Validation(_)));

        assert!(h.queue.enqueued().is_empty());
        assert!(h.service.find_all().await.unwrap().is_empty());

        let spans = h.spans.get_finished_spans();
        let root = spans.iter().find(|s| s.name == "person.create").unwrap();
        assert!(matches!(root.status, Status::Error { .. }));
        assert!(!spans.iter().any(|s| s.name == "store.create"));
    }

    #[tokio::test]
    async fn negative_age_is_rejected() {
        let h = harness();
        let err = h.service.create(input("Ada", -1)).await.unwrap_err();
        assert!(matches!(err, PersonError::Validation(_)));
    }

    #[tokio::test]
    async fn find_one_missing_is_a_recorded_business_error() {
        let h = harness();
        let err = h.service.find_one(42).await.unwrap_err();
        assert!(matches!(err, PersonError::NotFound(42)));

        let spans = h.spans.get_finished_spans();
        let root = spans.iter().find(|s| s.name == "person.find_one").unwrap();
        assert_eq!(root.status, Status::error("person 42 not found"));
        assert_eq!(root.events[0].name, "exception");
    }

    #[tokio::test]
    async fn find_all_reports_count() {
        let h = harness();
        h.service.create(input("Ada", 36)).await.unwrap();
        h.service.create(input("Alan", 41)).await.unwrap();

        let people = h.service.find_all().await.unwrap();
        assert_eq!(people.len(), 2);

        let spans = h.spans.get_finished_spans();
        let root = spans.iter().find(|s| s.name == "person.find_all").unwrap();
        assert!(root
            .attributes
            .contains(&KeyValue::new("person.count", 2i64)));
    }

    #[tokio::test]
    async fn operations_are_counted_with_outcome() {
        let h = harness();
        h.service.create(input("Ada", 36)).await.unwrap();
        let _ = h.service.find_one(99).await;

        let snapshot = h.meter_provider.collect();
        let counter = snapshot
            .metrics
            .iter()
            .find(|m| m.name == "person.operations")
            .unwrap();
        let points = match &counter.data {
            MetricData::Sum(points) => points,
            _ => panic!("expected sum"),
        };

        let ok_create = points
            .iter()
            .find(|p| {
                p.attributes
                    == vec![
                        KeyValue::new("operation", "create"),
                        KeyValue::new("outcome", "ok"),
                    ]
            })
            .unwrap();
        assert_eq!(ok_create.value, 1);

        let failed_find = points
            .iter()
            .find(|p| {
                p.attributes
                    == vec![
                        KeyValue::new("operation", "find_one"),
                        KeyValue::new("outcome", "error"),
                    ]
            })
            .unwrap();
        assert_eq!(failed_find.value, 1);
    }
}
