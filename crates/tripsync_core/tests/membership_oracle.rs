use tripsync_core::db::open_db_in_memory;
use tripsync_core::{
    Basecamp, Capability, DocumentStore, MemberRole, MembershipOracle, MembershipRepository,
    MembershipStatus, RepoError, SqliteDocumentStore, SqliteMembershipRepository,
    INITIAL_VERSION,
};
use uuid::Uuid;

#[test]
fn create_trip_registers_owner_and_empty_basecamp() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteMembershipRepository::try_new(&conn).unwrap();
    let owner = Uuid::new_v4();

    let trip = repo.create_trip("  Lisbon long weekend ", owner).unwrap();
    assert_eq!(trip.name, "Lisbon long weekend");
    assert_eq!(trip.created_by, owner);

    let membership = repo.get_membership(trip.trip_id, owner).unwrap().unwrap();
    assert_eq!(membership.role, MemberRole::Owner);
    assert!(membership.is_active());

    let store = SqliteDocumentStore::try_new(&conn).unwrap();
    let basecamp = store.load::<Basecamp>(trip.trip_id).unwrap().unwrap();
    assert_eq!(basecamp.version, INITIAL_VERSION);
    assert_eq!(basecamp.trip_id, trip.trip_id);
    assert!(basecamp.payload.location.is_none());
}

#[test]
fn blank_trip_name_is_rejected() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteMembershipRepository::try_new(&conn).unwrap();

    let err = repo.create_trip("   ", Uuid::new_v4()).unwrap_err();
    assert!(matches!(err, RepoError::InvalidTripName));
}

#[test]
fn oracle_answers_by_role_and_status() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteMembershipRepository::try_new(&conn).unwrap();
    let owner = Uuid::new_v4();
    let member = Uuid::new_v4();
    let viewer = Uuid::new_v4();
    let stranger = Uuid::new_v4();
    let trip = repo.create_trip("Alps", owner).unwrap();
    repo.add_member(trip.trip_id, member, MemberRole::Member)
        .unwrap();
    repo.add_member(trip.trip_id, viewer, MemberRole::Viewer)
        .unwrap();

    assert!(repo.is_active_member(trip.trip_id, member).unwrap());
    assert!(repo.is_active_member(trip.trip_id, viewer).unwrap());
    assert!(!repo.is_active_member(trip.trip_id, stranger).unwrap());

    assert!(repo
        .has_capability(trip.trip_id, member, Capability::Vote)
        .unwrap());
    assert!(!repo
        .has_capability(trip.trip_id, member, Capability::ManagePoll)
        .unwrap());
    assert!(repo
        .has_capability(trip.trip_id, owner, Capability::ManagePoll)
        .unwrap());
    assert!(!repo
        .has_capability(trip.trip_id, viewer, Capability::Vote)
        .unwrap());
}

#[test]
fn leaving_revokes_access_and_rejoining_reactivates() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteMembershipRepository::try_new(&conn).unwrap();
    let owner = Uuid::new_v4();
    let user = Uuid::new_v4();
    let trip = repo.create_trip("Road trip", owner).unwrap();
    repo.add_member(trip.trip_id, user, MemberRole::Member)
        .unwrap();

    let err = repo
        .add_member(trip.trip_id, user, MemberRole::Admin)
        .unwrap_err();
    assert!(matches!(err, RepoError::AlreadyMember { .. }));

    repo.leave_trip(trip.trip_id, user).unwrap();
    assert!(!repo.is_active_member(trip.trip_id, user).unwrap());
    let left = repo.get_membership(trip.trip_id, user).unwrap().unwrap();
    assert_eq!(left.status, MembershipStatus::Left);
    assert!(left.left_at.is_some());

    let rejoined = repo
        .add_member(trip.trip_id, user, MemberRole::Admin)
        .unwrap();
    assert!(rejoined.is_active());
    assert_eq!(rejoined.role, MemberRole::Admin);
    assert!(rejoined.left_at.is_none());
}

#[test]
fn removed_members_and_deleted_trips_grant_nothing() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteMembershipRepository::try_new(&conn).unwrap();
    let owner = Uuid::new_v4();
    let user = Uuid::new_v4();
    let trip = repo.create_trip("Festival", owner).unwrap();
    repo.add_member(trip.trip_id, user, MemberRole::Member)
        .unwrap();

    repo.remove_member(trip.trip_id, user).unwrap();
    assert!(!repo
        .has_capability(trip.trip_id, user, Capability::CompleteTask)
        .unwrap());
    assert!(matches!(
        repo.remove_member(trip.trip_id, user).unwrap_err(),
        RepoError::MembershipNotFound { .. }
    ));

    repo.delete_trip(trip.trip_id).unwrap();
    assert!(!repo.is_active_member(trip.trip_id, owner).unwrap());
    assert!(repo.list_active_members(trip.trip_id).unwrap().is_empty());
    assert!(matches!(
        repo.delete_trip(trip.trip_id).unwrap_err(),
        RepoError::TripNotFound(_)
    ));
}

#[test]
fn change_role_applies_to_active_members_only() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteMembershipRepository::try_new(&conn).unwrap();
    let owner = Uuid::new_v4();
    let user = Uuid::new_v4();
    let trip = repo.create_trip("Ski week", owner).unwrap();
    repo.add_member(trip.trip_id, user, MemberRole::Viewer)
        .unwrap();

    repo.change_role(trip.trip_id, user, MemberRole::Member)
        .unwrap();
    assert!(repo
        .has_capability(trip.trip_id, user, Capability::EditLocation)
        .unwrap());

    let members = repo.list_active_members(trip.trip_id).unwrap();
    assert_eq!(members.len(), 2);

    repo.leave_trip(trip.trip_id, user).unwrap();
    assert!(matches!(
        repo.change_role(trip.trip_id, user, MemberRole::Admin)
            .unwrap_err(),
        RepoError::MembershipNotFound { .. }
    ));
}
