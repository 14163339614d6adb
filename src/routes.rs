use std::{sync::Arc, time::Duration};

use actix_web::{get, post, put, web, HttpRequest, HttpResponse, Responder};
use chrono::{Local, Utc};
use serde_json::Value;

use crate::{
    aggregation::{Metric, MetricAggregator, MetricSeries},
    error::{Error, ErrorReply},
    models::{
        CommentView, FeedbackFilter, FeedbackSubmission, FeedbackView, ModerationRequest,
        NewFeedback, Ratings, Status,
    },
    store::{self, FeedbackStore},
};

pub const MODERATOR_HEADER: &str = "X-Moderator";

pub struct AppState {
    pub store: Arc<dyn FeedbackStore>,
    pub aggregator: MetricAggregator,
    pub store_timeout: Duration,
}

impl AppState {
    pub fn new(store: Arc<dyn FeedbackStore>, store_timeout: Duration) -> Self {
        AppState {
            aggregator: MetricAggregator::new(Arc::clone(&store), store_timeout),
            store,
            store_timeout,
        }
    }
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(ping)
        .service(ready)
        .service(metric_by_day)
        .service(comments)
        .service(submit_feedback)
        .service(pending_feedback)
        .service(feedback_history)
        .service(moderate_feedback)
        .service(toggle_feedback);
}

fn moderator(req: &HttpRequest) -> String {
    req.headers()
        .get(MODERATOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or("unknown")
        .to_string()
}

fn validate(submission: FeedbackSubmission) -> Result<NewFeedback, Error> {
    let fields = [
        ("availability", submission.availability),
        ("staff", submission.staff),
        ("waitTime", submission.wait_time),
        ("experience", submission.experience),
    ];
    if let Some((name, value)) = fields.iter().find(|(_, v)| !(1..=5).contains(v)) {
        return Err(Error::InvalidFeedback(format!(
            "{name} must be between 1 and 5, got {value}"
        )));
    }
    if submission.comments.trim().is_empty() {
        return Err(Error::InvalidFeedback("comments are required".to_string()));
    }

    Ok(NewFeedback {
        consent: submission.consent,
        ratings: Ratings {
            availability: Some(Value::from(submission.availability)),
            staff: Some(Value::from(submission.staff)),
            wait_time: Some(Value::from(submission.wait_time)),
            experience: Some(Value::from(submission.experience)),
        },
        comments: Some(submission.comments),
        keywords: submission.keywords.filter(|k| !k.trim().is_empty()),
        client_timestamp: submission.timestamp,
    })
}

#[utoipa::path(get, path = "/ping", responses((status = 200, body = String)))]
#[get("/ping")]
pub async fn ping(state: web::Data<AppState>) -> Result<HttpResponse, Error> {
    store::call(&state.store, state.store_timeout, |store| store.ping()).await?;
    Ok(HttpResponse::Ok()
        .content_type(mime::TEXT_PLAIN_UTF_8)
        .body("pong"))
}

#[utoipa::path(get, path = "/ready", responses((status = 200, body = String)))]
#[get("/ready")]
pub async fn ready() -> impl Responder {
    HttpResponse::Ok()
        .content_type(mime::TEXT_PLAIN_UTF_8)
        .body("ok")
}

/// Daily averages of one metric over the last five days.
#[utoipa::path(
    get,
    path = "/api/metrics/{metric}",
    tag = "metrics",
    params(("metric" = String, Path, description = "availability, staff, waitTime, experience or general")),
    responses(
        (status = 200, body = MetricSeries),
        (status = 400, body = ErrorReply),
        (status = 503, body = ErrorReply),
    )
)]
#[get("/api/metrics/{metric}")]
pub async fn metric_by_day(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<web::Json<MetricSeries>, Error> {
    let metric: Metric = path.into_inner().parse()?;
    let points = state.aggregator.daily_averages(metric, Local::now()).await?;

    Ok(web::Json(MetricSeries {
        metric,
        points: points.into(),
    }))
}

/// Approved comments from customers who agreed to have them displayed.
#[utoipa::path(
    get,
    path = "/api/feedback",
    tag = "feedback",
    responses((status = 200, body = Vec<CommentView>))
)]
#[get("/api/feedback")]
pub async fn comments(state: web::Data<AppState>) -> Result<web::Json<Vec<CommentView>>, Error> {
    let records = store::call(&state.store, state.store_timeout, |store| {
        store.query(&FeedbackFilter::visible())
    })
    .await?;

    Ok(web::Json(
        records
            .into_iter()
            .filter(|r| r.has_text())
            .map(CommentView::from)
            .collect(),
    ))
}

#[utoipa::path(
    post,
    path = "/api/feedback",
    tag = "feedback",
    request_body = FeedbackSubmission,
    responses(
        (status = 201, body = FeedbackView),
        (status = 400, body = ErrorReply),
    )
)]
#[post("/api/feedback")]
pub async fn submit_feedback(
    state: web::Data<AppState>,
    body: web::Json<FeedbackSubmission>,
) -> Result<HttpResponse, Error> {
    let feedback = validate(body.into_inner())?;
    let record = store::call(&state.store, state.store_timeout, move |store| {
        store.insert(feedback)
    })
    .await?;

    tracing::info!(id = %record.id, "feedback submitted");
    Ok(HttpResponse::Created().json(FeedbackView::from(record)))
}

/// Pending feedback that carries a comment or keyword.
#[utoipa::path(
    get,
    path = "/api/admin/feedback/pending",
    tag = "moderation",
    responses((status = 200, body = Vec<FeedbackView>))
)]
#[get("/api/admin/feedback/pending")]
pub async fn pending_feedback(
    state: web::Data<AppState>,
) -> Result<web::Json<Vec<FeedbackView>>, Error> {
    let records = store::call(&state.store, state.store_timeout, |store| {
        store.query(&FeedbackFilter::status(Status::Pending))
    })
    .await?;

    Ok(web::Json(
        records
            .into_iter()
            .filter(|r| r.has_text())
            .map(FeedbackView::from)
            .collect(),
    ))
}

#[utoipa::path(
    get,
    path = "/api/admin/feedback/history",
    tag = "moderation",
    responses((status = 200, body = Vec<FeedbackView>))
)]
#[get("/api/admin/feedback/history")]
pub async fn feedback_history(
    state: web::Data<AppState>,
) -> Result<web::Json<Vec<FeedbackView>>, Error> {
    let filter = FeedbackFilter {
        statuses: vec![Status::Approved, Status::Rejected],
        ..Default::default()
    };
    let records = store::call(&state.store, state.store_timeout, move |store| {
        store.query(&filter)
    })
    .await?;

    Ok(web::Json(records.into_iter().map(FeedbackView::from).collect()))
}

#[utoipa::path(
    put,
    path = "/api/admin/feedback/{id}/status",
    tag = "moderation",
    request_body = ModerationRequest,
    params(
        ("id" = String, Path),
        ("X-Moderator" = Option<String>, Header, description = "Moderator identity"),
    ),
    responses(
        (status = 200, body = FeedbackView),
        (status = 400, body = ErrorReply),
        (status = 404, body = ErrorReply),
    )
)]
#[put("/api/admin/feedback/{id}/status")]
pub async fn moderate_feedback(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<ModerationRequest>,
) -> Result<web::Json<FeedbackView>, Error> {
    let id = path.into_inner();
    let status = body.into_inner().status;
    if status == Status::Pending {
        return Err(Error::InvalidModeration(status));
    }

    let view = set_status(&state, &id, status, None, moderator(&req))
        .await?
        .ok_or(Error::NotFound(id))?;
    Ok(web::Json(view))
}

/// Flips a moderated record between approved and rejected.
#[utoipa::path(
    post,
    path = "/api/admin/feedback/{id}/toggle",
    tag = "moderation",
    params(
        ("id" = String, Path),
        ("X-Moderator" = Option<String>, Header, description = "Moderator identity"),
    ),
    responses(
        (status = 200, body = FeedbackView),
        (status = 404, body = ErrorReply),
        (status = 409, body = ErrorReply),
    )
)]
#[post("/api/admin/feedback/{id}/toggle")]
pub async fn toggle_feedback(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<web::Json<FeedbackView>, Error> {
    let id = path.into_inner();
    let lookup = id.clone();
    let current = store::call(&state.store, state.store_timeout, move |store| {
        store.find(&lookup)
    })
    .await?
    .ok_or_else(|| Error::NotFound(id.clone()))?;

    let next = match current.status {
        Status::Approved => Status::Rejected,
        Status::Rejected => Status::Approved,
        Status::Pending => return Err(Error::NotModerated(id)),
    };

    // only applies if nobody moderated the record since it was read
    let view = set_status(&state, &id, next, Some(current.status), moderator(&req))
        .await?
        .ok_or(Error::ModeratedConcurrently(id))?;
    Ok(web::Json(view))
}

/// `None` when no record was updated.
async fn set_status(
    state: &AppState,
    id: &str,
    status: Status,
    expected: Option<Status>,
    moderator: String,
) -> Result<Option<FeedbackView>, Error> {
    let lookup = id.to_string();
    let who = moderator.clone();
    let updated = store::call(&state.store, state.store_timeout, move |store| {
        if store.set_status(&lookup, status, expected, &who, Utc::now())? {
            store.find(&lookup)
        } else {
            Ok(None)
        }
    })
    .await?;

    if updated.is_some() {
        tracing::info!(%id, %status, %moderator, "feedback moderated");
    }
    Ok(updated.map(FeedbackView::from))
}

#[cfg(test)]
mod tests {
    use actix_web::{
        http::{header, StatusCode},
        test, App,
    };
    use chrono::DateTime;
    use serde_json::json;

    use super::*;
    use crate::{
        aggregation::format_day,
        models::{Consent, RawFeedback, RawTimestamp},
        store::memory::MemoryFeedbackStore,
    };

    fn state(store: &Arc<MemoryFeedbackStore>) -> web::Data<AppState> {
        web::Data::new(AppState::new(store.clone(), Duration::from_secs(1)))
    }

    fn record(id: &str, status: Status, consent: Consent, text: Option<&str>) -> RawFeedback {
        RawFeedback {
            id: id.to_string(),
            status,
            consent,
            ratings: serde_json::from_value(json!({"staff": 4, "availability": 2})).unwrap(),
            comments: text.map(str::to_string),
            keywords: None,
            timestamp: RawTimestamp::Server(Utc::now()),
            moderated_by: None,
            moderated_at: None,
        }
    }

    fn submission() -> Value {
        json!({
            "availability": 5,
            "staff": 4,
            "waitTime": 3,
            "experience": 5,
            "keywords": "rápido",
            "comments": "Todo muy bien",
            "consent": "si"
        })
    }

    #[actix_web::test]
    async fn ping_checks_the_store() {
        let store = Arc::new(MemoryFeedbackStore::default());
        let app = test::init_service(App::new().app_data(state(&store)).configure(config)).await;

        let req = test::TestRequest::get().uri("/ping").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            mime::TEXT_PLAIN_UTF_8.as_ref()
        );
        assert_eq!(test::read_body(resp).await, "pong");
    }

    #[actix_web::test]
    async fn submitted_feedback_is_pending() {
        let store = Arc::new(MemoryFeedbackStore::default());
        let app = test::init_service(App::new().app_data(state(&store)).configure(config)).await;

        let req = test::TestRequest::post()
            .uri("/api/feedback")
            .set_json(submission())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let view: FeedbackView = test::read_body_json(resp).await;
        assert_eq!(view.status, Status::Pending);
        assert_eq!(view.ratings.wait_time, Some(json!(3)));

        let stored = store.records();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].status, Status::Pending);
        assert_eq!(stored[0].keywords.as_deref(), Some("rápido"));
    }

    #[actix_web::test]
    async fn invalid_submissions_are_rejected() {
        let store = Arc::new(MemoryFeedbackStore::default());
        let app = test::init_service(App::new().app_data(state(&store)).configure(config)).await;

        let mut out_of_range = submission();
        out_of_range["staff"] = json!(6);
        let mut no_comment = submission();
        no_comment["comments"] = json!("  ");

        for body in [out_of_range, no_comment] {
            let req = test::TestRequest::post()
                .uri("/api/feedback")
                .set_json(body)
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        }
        assert!(store.records().is_empty());
    }

    #[actix_web::test]
    async fn metric_series_covers_five_days() {
        let store = Arc::new(MemoryFeedbackStore::with_records(vec![
            record("a", Status::Approved, Consent::Si, None),
            record("b", Status::Pending, Consent::Si, None),
        ]));
        let app = test::init_service(App::new().app_data(state(&store)).configure(config)).await;

        let req = test::TestRequest::get().uri("/api/metrics/staff").to_request();
        let series: MetricSeries = test::call_and_read_body_json(&app, req).await;

        assert_eq!(series.metric, Metric::Staff);
        assert_eq!(series.points.len(), 5);
        assert_eq!(
            series.points.iter().map(|p| p.samples).sum::<usize>(),
            1
        );
        // the record lands on today, or on yesterday if midnight passed mid-request
        let rated: Vec<_> = series.points.iter().filter(|p| p.samples == 1).collect();
        assert_eq!(rated[0].rating, 4.0);
        let today = Local::now().date_naive();
        assert!([today, today.pred_opt().unwrap()]
            .map(format_day)
            .contains(&rated[0].day));
    }

    #[actix_web::test]
    async fn general_metric_averages_each_record() {
        let store = Arc::new(MemoryFeedbackStore::with_records(vec![record(
            "a",
            Status::Approved,
            Consent::Si,
            None,
        )]));
        let app = test::init_service(App::new().app_data(state(&store)).configure(config)).await;

        let req = test::TestRequest::get().uri("/api/metrics/general").to_request();
        let series: MetricSeries = test::call_and_read_body_json(&app, req).await;
        let rated = series.points.iter().find(|p| p.samples == 1).unwrap();
        assert_eq!(rated.rating, 3.0);
    }

    #[actix_web::test]
    async fn unknown_metric_is_a_bad_request() {
        let store = Arc::new(MemoryFeedbackStore::default());
        let app = test::init_service(App::new().app_data(state(&store)).configure(config)).await;

        let req = test::TestRequest::get().uri("/api/metrics/speed").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn store_failure_is_reported_not_hidden() {
        let store = Arc::new(MemoryFeedbackStore::failing("connection refused"));
        let app = test::init_service(App::new().app_data(state(&store)).configure(config)).await;

        let req = test::TestRequest::get().uri("/api/metrics/general").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(
            body["error"],
            "aggregation of 'general' failed: connection refused"
        );
    }

    #[actix_web::test]
    async fn carousel_shows_only_visible_comments() {
        let store = Arc::new(MemoryFeedbackStore::with_records(vec![
            record("a", Status::Approved, Consent::Si, Some("Excelente atención")),
            record("b", Status::Approved, Consent::No, Some("No mostrar")),
            record("c", Status::Pending, Consent::Si, Some("Pendiente")),
            record("d", Status::Approved, Consent::Si, None),
        ]));
        let app = test::init_service(App::new().app_data(state(&store)).configure(config)).await;

        let req = test::TestRequest::get().uri("/api/feedback").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body, json!([{"comments": "Excelente atención", "keywords": null}]));
    }

    #[actix_web::test]
    async fn pending_lists_records_awaiting_moderation() {
        let store = Arc::new(MemoryFeedbackStore::with_records(vec![
            record("a", Status::Pending, Consent::Si, Some("Revisar")),
            record("b", Status::Pending, Consent::Si, None),
            record("c", Status::Approved, Consent::Si, Some("Listo")),
        ]));
        let app = test::init_service(App::new().app_data(state(&store)).configure(config)).await;

        let req = test::TestRequest::get()
            .uri("/api/admin/feedback/pending")
            .to_request();
        let views: Vec<FeedbackView> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].id, "a");
    }

    #[actix_web::test]
    async fn moderation_records_who_and_when() {
        let store = Arc::new(MemoryFeedbackStore::with_records(vec![record(
            "a",
            Status::Pending,
            Consent::Si,
            Some("Revisar"),
        )]));
        let app = test::init_service(App::new().app_data(state(&store)).configure(config)).await;

        let req = test::TestRequest::put()
            .uri("/api/admin/feedback/a/status")
            .insert_header((MODERATOR_HEADER, "admin@tienda.cl"))
            .set_json(json!({"status": "approved"}))
            .to_request();
        let view: FeedbackView = test::call_and_read_body_json(&app, req).await;
        assert_eq!(view.status, Status::Approved);
        assert_eq!(view.moderated_by.as_deref(), Some("admin@tienda.cl"));
        let moderated_at: DateTime<Utc> = view.moderated_at.unwrap();
        assert!(moderated_at <= Utc::now());

        let req = test::TestRequest::get()
            .uri("/api/admin/feedback/history")
            .to_request();
        let history: Vec<FeedbackView> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(history.len(), 1);
    }

    #[actix_web::test]
    async fn moderation_without_header_uses_unknown() {
        let store = Arc::new(MemoryFeedbackStore::with_records(vec![record(
            "a",
            Status::Pending,
            Consent::Si,
            None,
        )]));
        let app = test::init_service(App::new().app_data(state(&store)).configure(config)).await;

        let req = test::TestRequest::put()
            .uri("/api/admin/feedback/a/status")
            .set_json(json!({"status": "rejected"}))
            .to_request();
        let view: FeedbackView = test::call_and_read_body_json(&app, req).await;
        assert_eq!(view.moderated_by.as_deref(), Some("unknown"));
    }

    #[actix_web::test]
    async fn moderation_errors() {
        let store = Arc::new(MemoryFeedbackStore::with_records(vec![record(
            "a",
            Status::Pending,
            Consent::Si,
            None,
        )]));
        let app = test::init_service(App::new().app_data(state(&store)).configure(config)).await;

        let req = test::TestRequest::put()
            .uri("/api/admin/feedback/missing/status")
            .set_json(json!({"status": "approved"}))
            .to_request();
        assert_eq!(
            test::call_service(&app, req).await.status(),
            StatusCode::NOT_FOUND
        );

        let req = test::TestRequest::put()
            .uri("/api/admin/feedback/a/status")
            .set_json(json!({"status": "pending"}))
            .to_request();
        assert_eq!(
            test::call_service(&app, req).await.status(),
            StatusCode::BAD_REQUEST
        );

        let req = test::TestRequest::post()
            .uri("/api/admin/feedback/a/toggle")
            .to_request();
        assert_eq!(
            test::call_service(&app, req).await.status(),
            StatusCode::CONFLICT
        );
    }

    #[actix_web::test]
    async fn toggle_does_not_overwrite_a_concurrent_moderation() {
        let store = Arc::new(
            MemoryFeedbackStore::with_records(vec![record(
                "a",
                Status::Approved,
                Consent::Si,
                Some("Bien"),
            )])
            .moderated_after_find(Status::Rejected),
        );
        let app = test::init_service(App::new().app_data(state(&store)).configure(config)).await;

        let req = test::TestRequest::post()
            .uri("/api/admin/feedback/a/toggle")
            .insert_header((MODERATOR_HEADER, "supervisora"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let stored = &store.records()[0];
        assert_eq!(stored.status, Status::Rejected);
        assert_eq!(stored.moderated_by, None);
    }

    #[actix_web::test]
    async fn toggle_flips_moderated_status() {
        let store = Arc::new(MemoryFeedbackStore::with_records(vec![record(
            "a",
            Status::Approved,
            Consent::Si,
            Some("Bien"),
        )]));
        let app = test::init_service(App::new().app_data(state(&store)).configure(config)).await;

        for expected in [Status::Rejected, Status::Approved] {
            let req = test::TestRequest::post()
                .uri("/api/admin/feedback/a/toggle")
                .insert_header((MODERATOR_HEADER, "supervisora"))
                .to_request();
            let view: FeedbackView = test::call_and_read_body_json(&app, req).await;
            assert_eq!(view.status, expected);
            assert_eq!(store.records()[0].status, expected);
        }
    }
}
