use chrono::{TimeZone, Utc};
use exolog_core::db::open_db_in_memory;
use exolog_core::{
    normalize, CodecError, EventFilter, EventPayload, EventRepository, EventService,
    EventServiceError, FilterError, SqliteEventRepository, StoreError,
};
use rusqlite::Connection;
use uuid::Uuid;

fn insert_event(
    repo: &SqliteEventRepository<'_>,
    timestamp: &str,
    channel: &str,
    tags: &[&str],
) -> Uuid {
    let payload = EventPayload::new(timestamp, "manual", channel).with_tags(tags.iter().copied());
    repo.insert(&normalize(&payload).unwrap()).unwrap().id
}

fn ids(repo: &SqliteEventRepository<'_>, filter: &EventFilter) -> Vec<Uuid> {
    repo.list_events(filter)
        .unwrap()
        .into_iter()
        .map(|event| event.id)
        .collect()
}

#[test]
fn inserted_event_is_returned_by_a_matching_query() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteEventRepository::try_new(&conn).unwrap();
    let id = insert_event(&repo, "2024-01-01T10:00:00Z", "note", &["idea"]);

    let events = repo.list_events(&EventFilter::new(10)).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].id, id);
    assert_eq!(events[0].tags, vec!["idea"]);
}

#[test]
fn channel_filter_selects_one_of_two_simultaneous_events() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteEventRepository::try_new(&conn).unwrap();
    insert_event(&repo, "2024-01-01T10:00:00Z", "note", &[]);
    let alert = insert_event(&repo, "2024-01-01T10:00:00Z", "alert", &[]);
    assert_eq!(ids(&repo, &EventFilter::new(10).channel("alert")), vec![alert]);

    let conn = open_db_in_memory().unwrap();
    let repo = SqliteEventRepository::try_new(&conn).unwrap();
    let alert = insert_event(&repo, "2024-01-01T10:00:00Z", "alert", &[]);
    insert_event(&repo, "2024-01-01T10:00:00Z", "note", &[]);
    assert_eq!(ids(&repo, &EventFilter::new(10).channel("alert")), vec![alert]);
}

#[test]
fn tag_filter_with_limit_returns_only_tagged_event() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteEventRepository::try_new(&conn).unwrap();
    let school = insert_event(&repo, "2024-01-01T10:00:00Z", "note", &["school", "homework"]);
    insert_event(&repo, "2024-01-02T10:00:00Z", "note", &["work"]);

    assert_eq!(ids(&repo, &EventFilter::new(1).tag("school")), vec![school]);
}

#[test]
fn tag_filter_is_exact_membership_not_substring() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteEventRepository::try_new(&conn).unwrap();
    insert_event(&repo, "2024-01-01T10:00:00Z", "note", &["homework"]);
    insert_event(&repo, "2024-01-01T11:00:00Z", "note", &["networking"]);
    let work = insert_event(&repo, "2024-01-01T12:00:00Z", "note", &["work"]);

    assert_eq!(ids(&repo, &EventFilter::new(10).tag("work")), vec![work]);
    assert!(ids(&repo, &EventFilter::new(10).tag("\"work\"")).is_empty());
    assert!(ids(&repo, &EventFilter::new(10).tag(",")).is_empty());
}

#[test]
fn tag_filter_is_case_insensitive_and_tags_combine_with_and() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteEventRepository::try_new(&conn).unwrap();
    let both = insert_event(&repo, "2024-01-01T10:00:00Z", "note", &["school", "math"]);
    insert_event(&repo, "2024-01-01T11:00:00Z", "note", &["school"]);

    let filter = EventFilter::new(10).tag(" School ").tag("MATH");
    assert_eq!(ids(&repo, &filter), vec![both]);
}

#[test]
fn results_are_newest_first_with_ties_in_insertion_order() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteEventRepository::try_new(&conn).unwrap();
    let oldest = insert_event(&repo, "2024-01-01T08:00:00Z", "note", &[]);
    let tie_first = insert_event(&repo, "2024-01-01T10:00:00Z", "note", &[]);
    let newest = insert_event(&repo, "2024-01-01T12:00:00+01:00", "note", &[]);
    let tie_second = insert_event(&repo, "2024-01-01T10:00:00Z", "note", &[]);

    assert_eq!(
        ids(&repo, &EventFilter::new(10)),
        vec![newest, tie_first, tie_second, oldest]
    );
}

#[test]
fn limit_caps_results_and_offset_pages_through_them() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteEventRepository::try_new(&conn).unwrap();
    let mut inserted = Vec::new();
    for hour in 0..5 {
        inserted.push(insert_event(
            &repo,
            &format!("2024-01-01T0{hour}:00:00Z"),
            "note",
            &[],
        ));
    }
    inserted.reverse();

    assert_eq!(ids(&repo, &EventFilter::new(2)), inserted[..2].to_vec());
    assert_eq!(
        ids(&repo, &EventFilter::new(2).offset(2)),
        inserted[2..4].to_vec()
    );
    assert_eq!(
        ids(&repo, &EventFilter::new(2).offset(4)),
        inserted[4..].to_vec()
    );
    assert!(ids(&repo, &EventFilter::new(2).offset(5)).is_empty());
}

#[test]
fn time_range_bounds_are_inclusive() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteEventRepository::try_new(&conn).unwrap();
    insert_event(&repo, "2024-01-01T09:59:59Z", "note", &[]);
    let at_start = insert_event(&repo, "2024-01-01T10:00:00Z", "note", &[]);
    let at_end = insert_event(&repo, "2024-01-01T12:00:00Z", "note", &[]);
    insert_event(&repo, "2024-01-01T12:00:01Z", "note", &[]);

    let filter = EventFilter::new(10).between(
        Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
    );
    assert_eq!(ids(&repo, &filter), vec![at_end, at_start]);
}

#[test]
fn sub_microsecond_input_is_stored_and_compared_at_one_precision() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteEventRepository::try_new(&conn).unwrap();
    let payload = EventPayload::new("2024-01-01T10:00:00.0000009Z", "manual", "note");
    let normalized = normalize(&payload).unwrap();
    let on_the_second = repo.insert(&normalized).unwrap();
    let one_micro_later = insert_event(&repo, "2024-01-01T10:00:00.000001Z", "note", &[]);

    let loaded = repo.get_event(on_the_second.id).unwrap().unwrap();
    assert_eq!(loaded.timestamp, normalized.timestamp);
    assert_eq!(
        loaded.timestamp,
        Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()
    );

    let half_micro = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()
        + chrono::Duration::nanoseconds(500);
    let up_to = EventFilter::new(10).between(
        Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap(),
        half_micro,
    );
    assert_eq!(ids(&repo, &up_to), vec![on_the_second.id]);

    let from = EventFilter::new(10).between(
        half_micro,
        Utc.with_ymd_and_hms(2024, 1, 1, 11, 0, 0).unwrap(),
    );
    assert_eq!(ids(&repo, &from), vec![one_micro_later]);
}

#[test]
fn no_match_is_an_empty_result() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteEventRepository::try_new(&conn).unwrap();
    insert_event(&repo, "2024-01-01T10:00:00Z", "note", &["idea"]);

    let filter = EventFilter::new(10).source_system("calendar");
    assert!(repo.list_events(&filter).unwrap().is_empty());
}

#[test]
fn invalid_filters_are_rejected_before_storage() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteEventRepository::try_new(&conn).unwrap();

    let err = repo.list_events(&EventFilter::new(0)).unwrap_err();
    assert!(matches!(
        err,
        StoreError::BadFilter(FilterError::LimitOutOfRange(0))
    ));

    let inverted = EventFilter::new(10).between(
        Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
    );
    let err = repo.list_events(&inverted).unwrap_err();
    assert!(matches!(err, StoreError::BadFilter(FilterError::InvertedRange)));
}

#[test]
fn boundary_params_are_parsed_strictly() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteEventRepository::try_new(&conn).unwrap();
    let service = EventService::new(repo);
    service
        .ingest(&EventPayload::new("2024-01-01T10:00:00Z", "manual", "alert").with_tags(["ops"]))
        .unwrap();

    let events = service
        .list_with_params([("channel", "alert"), ("tag", "OPS"), ("limit", "5")])
        .unwrap();
    assert_eq!(events.len(), 1);

    let err = service
        .list_with_params([("chanel", "alert")])
        .unwrap_err();
    assert!(matches!(
        err,
        EventServiceError::Store(StoreError::BadFilter(FilterError::UnknownField(_)))
    ));

    let err = service.list_with_params([("limit", "many")]).unwrap_err();
    assert!(matches!(
        err,
        EventServiceError::Store(StoreError::BadFilter(FilterError::InvalidValue {
            field: "limit",
            ..
        }))
    ));
}

#[test]
fn corrupt_row_fails_the_whole_query() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteEventRepository::try_new(&conn).unwrap();
    insert_event(&repo, "2024-01-01T10:00:00Z", "note", &["idea"]);
    let broken = insert_event(&repo, "2024-01-01T11:00:00Z", "note", &["idea"]);
    corrupt_tags(&conn, broken);

    let err = repo.list_events(&EventFilter::new(10)).unwrap_err();
    match err {
        StoreError::CorruptRecord(CodecError::Corrupt { row_id, column, .. }) => {
            assert_eq!(row_id, Some(broken.to_string()));
            assert_eq!(column, "tags");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn corrupt_tags_under_a_tag_filter_are_reported_not_skipped() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteEventRepository::try_new(&conn).unwrap();
    insert_event(&repo, "2024-01-01T10:00:00Z", "note", &["idea"]);
    let broken = insert_event(&repo, "2024-01-01T11:00:00Z", "note", &["idea"]);
    corrupt_tags(&conn, broken);

    let err = repo
        .list_events(&EventFilter::new(10).tag("idea"))
        .unwrap_err();
    assert!(matches!(
        err,
        StoreError::CorruptRecord(CodecError::Corrupt { column: "tags", .. })
    ));
}

#[test]
fn raw_rows_stream_in_order_and_visitor_errors_stop_the_scan() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteEventRepository::try_new(&conn).unwrap();
    let early = insert_event(&repo, "2024-01-01T10:00:00Z", "note", &["idea"]);
    let late = insert_event(&repo, "2024-01-01T11:00:00Z", "note", &["idea"]);

    let rows = repo.query(&EventFilter::new(10)).unwrap();
    let row_ids: Vec<String> = rows.iter().map(|row| row.id.clone()).collect();
    assert_eq!(row_ids, vec![late.to_string(), early.to_string()]);
    assert_eq!(rows[0].tags.as_deref(), Some(r#"["idea"]"#));

    let mut seen = 0;
    let err = repo
        .query_each(&EventFilter::new(10), |_row| {
            seen += 1;
            Err(StoreError::Conflict(late))
        })
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));
    assert_eq!(seen, 1);
}

fn corrupt_tags(conn: &Connection, id: Uuid) {
    let updated = conn
        .execute(
            "UPDATE events SET tags = '[\"idea\"' WHERE id = ?1;",
            [id.to_string()],
        )
        .unwrap();
    assert_eq!(updated, 1);
}
