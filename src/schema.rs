table! {
    feedbacks (id) {
        id -> Varchar,
        status -> Varchar,
        consent -> Varchar,
        ratings -> Jsonb,
        comments -> Nullable<Text>,
        keywords -> Nullable<Text>,
        submitted_at -> Nullable<Timestamptz>,
        client_timestamp -> Nullable<Varchar>,
        moderated_by -> Nullable<Varchar>,
        moderated_at -> Nullable<Timestamptz>,
    }
}
