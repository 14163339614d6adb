use utoipa::OpenApi;

use crate::{
    aggregation::{DailyMetricPoint, Metric, MetricSeries},
    error::ErrorReply,
    models::{
        CommentView, Consent, FeedbackSubmission, FeedbackView, ModerationRequest, Ratings, Status,
    },
    routes,
};

#[derive(OpenApi)]
#[openapi(
    info(title = "Kiosk feedback API"),
    paths(
        routes::ping,
        routes::ready,
        routes::metric_by_day,
        routes::comments,
        routes::submit_feedback,
        routes::pending_feedback,
        routes::feedback_history,
        routes::moderate_feedback,
        routes::toggle_feedback,
    ),
    components(schemas(
        Metric,
        DailyMetricPoint,
        MetricSeries,
        Status,
        Consent,
        Ratings,
        FeedbackSubmission,
        FeedbackView,
        CommentView,
        ModerationRequest,
        ErrorReply,
    )),
    tags(
        (name = "metrics", description = "Per-day rating averages for the display screens"),
        (name = "feedback", description = "Survey submission and public comments"),
        (name = "moderation", description = "Admin review of submitted feedback"),
    )
)]
pub struct ApiDoc;
