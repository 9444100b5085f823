use rusqlite::Connection;
use std::sync::Arc;
use tripsync_core::db::open_db_in_memory;
use tripsync_core::{
    BasecampLocation, BasecampService, FixedClock, MemberRole, MembershipRepository,
    MutationReason, SqliteDocumentStore, SqliteMembershipRepository, TripId, TripSyncApi, UserId,
};
use uuid::Uuid;

const NOW_MS: i64 = 1_700_000_000_000;

struct Trip {
    trip_id: TripId,
    owner: UserId,
    member: UserId,
    viewer: UserId,
}

fn setup(conn: &Connection) -> Trip {
    let repo = SqliteMembershipRepository::try_new(conn).unwrap();
    let owner = Uuid::new_v4();
    let member = Uuid::new_v4();
    let viewer = Uuid::new_v4();
    let trip = repo.create_trip("Porto", owner).unwrap();
    repo.add_member(trip.trip_id, member, MemberRole::Member)
        .unwrap();
    repo.add_member(trip.trip_id, viewer, MemberRole::Viewer)
        .unwrap();
    Trip {
        trip_id: trip.trip_id,
        owner,
        member,
        viewer,
    }
}

fn service(
    conn: &Connection,
) -> BasecampService<SqliteDocumentStore<'_>, SqliteMembershipRepository<'_>> {
    BasecampService::new(
        SqliteDocumentStore::try_new(conn).unwrap(),
        SqliteMembershipRepository::try_new(conn).unwrap(),
    )
    .with_clock(Arc::new(FixedClock::new(NOW_MS)))
}

fn location(name: &str, lat: f64, lng: f64) -> BasecampLocation {
    BasecampLocation {
        name: name.to_string(),
        address: "Rua de Santa Catarina 1".to_string(),
        lat,
        lng,
    }
}

#[test]
fn two_clients_at_version_five_one_wins_one_conflicts() {
    let conn = open_db_in_memory().unwrap();
    let trip = setup(&conn);
    let basecamps = service(&conn);
    for (step, version) in (1..5).enumerate() {
        let outcome = basecamps
            .update_basecamp(
                trip.trip_id,
                Some(version),
                &location("Hostel", 41.14, -8.61 + step as f64 * 0.001),
                trip.owner,
            )
            .unwrap();
        assert!(outcome.applied);
    }
    assert_eq!(
        basecamps
            .get_basecamp(trip.trip_id, trip.owner)
            .unwrap()
            .unwrap()
            .version,
        5
    );

    let api = TripSyncApi::try_new(&conn)
        .unwrap()
        .with_clock(Arc::new(FixedClock::new(NOW_MS)));
    let client_a = api
        .update_basecamp(
            trip.trip_id,
            5,
            "Casa da Musica",
            "Av. da Boavista",
            41.158,
            -8.630,
            trip.owner,
        )
        .unwrap();
    assert!(client_a.success);
    assert!(!client_a.conflict);
    assert_eq!(client_a.new_version, Some(6));

    let client_b = api
        .update_basecamp(
            trip.trip_id,
            5,
            "Ribeira",
            "Cais da Ribeira",
            41.140,
            -8.613,
            trip.member,
        )
        .unwrap();
    assert!(!client_b.success);
    assert!(client_b.conflict);
    assert_eq!(client_b.current_version, Some(6));

    let view = basecamps
        .get_basecamp(trip.trip_id, trip.member)
        .unwrap()
        .unwrap();
    assert_eq!(view.version, 6);
    assert_eq!(view.location.unwrap().name, "Casa da Musica");
    assert_eq!(view.updated_by, Some(trip.owner));
    assert_eq!(view.updated_at, Some(NOW_MS));
}

#[test]
fn invalid_coordinates_are_rejected_without_version_bump() {
    let conn = open_db_in_memory().unwrap();
    let trip = setup(&conn);
    let api = TripSyncApi::try_new(&conn).unwrap();

    let err = api
        .update_basecamp(trip.trip_id, 1, "North pole+", "", 91.0, 0.0, trip.member)
        .unwrap_err();
    assert_eq!(err.reason(), Some(MutationReason::InvalidLocation));
    let err = api
        .update_basecamp(trip.trip_id, 1, "Nowhere", "", 0.0, f64::INFINITY, trip.member)
        .unwrap_err();
    assert_eq!(err.reason(), Some(MutationReason::InvalidLocation));

    let view = service(&conn)
        .get_basecamp(trip.trip_id, trip.member)
        .unwrap()
        .unwrap();
    assert_eq!(view.version, 1);
    assert!(view.location.is_none());
}

#[test]
fn labels_are_whitespace_normalized() {
    let conn = open_db_in_memory().unwrap();
    let trip = setup(&conn);
    let basecamps = service(&conn);

    let mut raw = location("  Hotel \t  Infante ", 41.1, -8.6);
    raw.address = "Rua\n  Nova".to_string();
    assert!(basecamps
        .update_basecamp(trip.trip_id, None, &raw, trip.member)
        .unwrap()
        .applied);

    let stored = basecamps
        .get_basecamp(trip.trip_id, trip.member)
        .unwrap()
        .unwrap()
        .location
        .unwrap();
    assert_eq!(stored.name, "Hotel Infante");
    assert_eq!(stored.address, "Rua Nova");
}

#[test]
fn overlong_name_is_truncated_and_accepted() {
    let conn = open_db_in_memory().unwrap();
    let trip = setup(&conn);
    let api = TripSyncApi::try_new(&conn).unwrap();

    let name = format!("{} b", "a".repeat(199));
    let response = api
        .update_basecamp(trip.trip_id, 1, &name, "Rua Nova", 1.0, 1.0, trip.owner)
        .unwrap();
    assert!(response.success);
    assert_eq!(response.new_version, Some(2));

    let stored = service(&conn)
        .get_basecamp(trip.trip_id, trip.owner)
        .unwrap()
        .unwrap()
        .location
        .unwrap();
    assert_eq!(stored.name, "a".repeat(199));
}

#[test]
fn viewers_and_outsiders_cannot_edit() {
    let conn = open_db_in_memory().unwrap();
    let trip = setup(&conn);
    let basecamps = service(&conn);
    let spot = location("Hostel", 41.14, -8.61);

    let viewer = basecamps
        .update_basecamp(trip.trip_id, Some(1), &spot, trip.viewer)
        .unwrap();
    assert_eq!(viewer.reason, MutationReason::Forbidden);
    let outsider = basecamps
        .update_basecamp(trip.trip_id, Some(1), &spot, Uuid::new_v4())
        .unwrap();
    assert_eq!(outsider.reason, MutationReason::NotAMember);
    assert!(basecamps
        .get_basecamp(trip.trip_id, Uuid::new_v4())
        .unwrap()
        .is_none());

    let missing = basecamps
        .update_basecamp(Uuid::new_v4(), None, &spot, trip.owner)
        .unwrap();
    assert_eq!(missing.reason, MutationReason::NotFound);
}

#[test]
fn clearing_is_versioned_and_idempotent() {
    let conn = open_db_in_memory().unwrap();
    let trip = setup(&conn);
    let basecamps = service(&conn);

    assert_eq!(
        basecamps
            .clear_basecamp(trip.trip_id, Some(1), trip.member)
            .unwrap()
            .reason,
        MutationReason::NoOp
    );
    basecamps
        .update_basecamp(
            trip.trip_id,
            Some(1),
            &location("Hostel", 41.14, -8.61),
            trip.member,
        )
        .unwrap();

    let stale = basecamps
        .clear_basecamp(trip.trip_id, Some(1), trip.owner)
        .unwrap();
    assert!(stale.conflict);
    let cleared = basecamps
        .clear_basecamp(trip.trip_id, Some(2), trip.owner)
        .unwrap();
    assert!(cleared.applied);
    assert_eq!(cleared.current_version, 3);
    assert!(basecamps
        .get_basecamp(trip.trip_id, trip.owner)
        .unwrap()
        .unwrap()
        .location
        .is_none());
}
