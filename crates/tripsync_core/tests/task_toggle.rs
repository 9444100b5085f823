use rusqlite::Connection;
use std::sync::Arc;
use tripsync_core::db::open_db_in_memory;
use tripsync_core::{
    DocumentStore, FixedClock, MemberRole, MembershipRepository, MutationReason, NewTask,
    SqliteDocumentStore, SqliteMembershipRepository, Task, TaskService, TripId, TripSyncApi,
    UserId,
};
use uuid::Uuid;

const NOW_MS: i64 = 1_700_000_000_000;

struct Trip {
    trip_id: TripId,
    owner: UserId,
    u1: UserId,
    u2: UserId,
    viewer: UserId,
}

fn setup(conn: &Connection) -> Trip {
    let repo = SqliteMembershipRepository::try_new(conn).unwrap();
    let owner = Uuid::new_v4();
    let u1 = Uuid::new_v4();
    let u2 = Uuid::new_v4();
    let viewer = Uuid::new_v4();
    let trip = repo.create_trip("Alps", owner).unwrap();
    repo.add_member(trip.trip_id, u1, MemberRole::Member).unwrap();
    repo.add_member(trip.trip_id, u2, MemberRole::Member).unwrap();
    repo.add_member(trip.trip_id, viewer, MemberRole::Viewer)
        .unwrap();
    Trip {
        trip_id: trip.trip_id,
        owner,
        u1,
        u2,
        viewer,
    }
}

type Tasks<'conn> = TaskService<SqliteDocumentStore<'conn>, SqliteMembershipRepository<'conn>>;

fn service(conn: &Connection) -> Tasks<'_> {
    TaskService::new(
        SqliteDocumentStore::try_new(conn).unwrap(),
        SqliteMembershipRepository::try_new(conn).unwrap(),
    )
    .with_clock(Arc::new(FixedClock::new(NOW_MS)))
}

fn create(tasks: &Tasks<'_>, trip: &Trip, assignees: Vec<UserId>) -> Uuid {
    tasks
        .create_task(
            trip.owner,
            NewTask {
                trip_id: trip.trip_id,
                title: "Rent snow chains".to_string(),
                assignees,
            },
        )
        .unwrap()
        .document_id
        .unwrap()
}

#[test]
fn assignment_scenario_gates_completion() {
    let conn = open_db_in_memory().unwrap();
    let trip = setup(&conn);
    let task_id = create(&service(&conn), &trip, vec![trip.u1]);
    let api = TripSyncApi::try_new(&conn)
        .unwrap()
        .with_clock(Arc::new(FixedClock::new(NOW_MS)));

    let err = api.toggle_task(task_id, trip.u2, true, 1).unwrap_err();
    assert_eq!(err.reason(), Some(MutationReason::NotAssigned));

    let response = api.toggle_task(task_id, trip.u1, true, 1).unwrap();
    assert!(response.success);
    assert_eq!(response.new_version, 2);
    assert!(response.is_completed);

    let task = SqliteDocumentStore::try_new(&conn)
        .unwrap()
        .load::<Task>(task_id)
        .unwrap()
        .unwrap();
    let completion = task.payload.completions.get(&trip.u1).unwrap();
    assert_eq!(completion.completed_at, Some(NOW_MS));
    assert!(!task.payload.completions.contains_key(&trip.u2));
}

#[test]
fn creator_passes_assignment_gate() {
    let conn = open_db_in_memory().unwrap();
    let trip = setup(&conn);
    let tasks = service(&conn);
    let task_id = create(&tasks, &trip, vec![trip.u1]);

    let toggled = tasks
        .toggle_completion(task_id, trip.owner, true, Some(1))
        .unwrap();
    assert!(toggled.outcome.applied);
    assert!(toggled.is_completed);
}

#[test]
fn reapplying_state_is_no_op_but_still_checks_version() {
    let conn = open_db_in_memory().unwrap();
    let trip = setup(&conn);
    let tasks = service(&conn);
    let task_id = create(&tasks, &trip, Vec::new());

    assert!(tasks
        .toggle_completion(task_id, trip.u2, true, Some(1))
        .unwrap()
        .outcome
        .applied);

    let same = tasks
        .toggle_completion(task_id, trip.u2, true, Some(2))
        .unwrap();
    assert_eq!(same.outcome.reason, MutationReason::NoOp);
    assert_eq!(same.outcome.current_version, 2);
    assert!(same.is_completed);

    let stale = tasks
        .toggle_completion(task_id, trip.u2, true, Some(1))
        .unwrap();
    assert!(stale.outcome.conflict);
    assert_eq!(stale.outcome.current_version, 2);

    let cleared = tasks
        .toggle_completion(task_id, trip.u2, false, None)
        .unwrap();
    assert!(cleared.outcome.applied);
    assert!(!cleared.is_completed);
    let task = SqliteDocumentStore::try_new(&conn)
        .unwrap()
        .load::<Task>(task_id)
        .unwrap()
        .unwrap();
    assert_eq!(task.version, 3);
    assert_eq!(task.payload.completions.get(&trip.u2).unwrap().completed_at, None);
}

#[test]
fn non_members_and_viewers_cannot_toggle() {
    let conn = open_db_in_memory().unwrap();
    let trip = setup(&conn);
    let tasks = service(&conn);
    let task_id = create(&tasks, &trip, Vec::new());

    let outsider = tasks
        .toggle_completion(task_id, Uuid::new_v4(), true, None)
        .unwrap();
    assert_eq!(outsider.outcome.reason, MutationReason::NotAMember);
    let viewer = tasks
        .toggle_completion(task_id, trip.viewer, true, None)
        .unwrap();
    assert_eq!(viewer.outcome.reason, MutationReason::Forbidden);
    assert_eq!(viewer.outcome.current_version, 1);
}

#[test]
fn reassignment_changes_who_may_toggle() {
    let conn = open_db_in_memory().unwrap();
    let trip = setup(&conn);
    let tasks = service(&conn);
    let task_id = create(&tasks, &trip, vec![trip.u1]);

    let assigned = tasks
        .assign_task(task_id, trip.owner, trip.u2, Some(1))
        .unwrap();
    assert!(assigned.applied);
    assert_eq!(
        tasks
            .assign_task(task_id, trip.owner, trip.u2, None)
            .unwrap()
            .reason,
        MutationReason::NoOp
    );
    assert!(tasks
        .toggle_completion(task_id, trip.u2, true, None)
        .unwrap()
        .outcome
        .applied);

    assert!(tasks
        .unassign_task(task_id, trip.owner, trip.u2, None)
        .unwrap()
        .applied);
    let gated = tasks
        .toggle_completion(task_id, trip.u2, false, None)
        .unwrap();
    assert_eq!(gated.outcome.reason, MutationReason::NotAssigned);
    assert!(gated.is_completed);

    let outsider = tasks
        .assign_task(task_id, trip.owner, Uuid::new_v4(), None)
        .unwrap();
    assert_eq!(outsider.reason, MutationReason::InvalidInput);

    let view = tasks.get_task(task_id, trip.u1).unwrap().unwrap();
    assert_eq!(view.assignees, vec![trip.u1]);
    assert_eq!(view.completed_by, vec![trip.u2]);
    assert!(view.viewer_may_toggle);
    assert!(tasks.get_task(task_id, Uuid::new_v4()).unwrap().is_none());
}

#[test]
fn blank_titles_and_foreign_assignees_are_rejected() {
    let conn = open_db_in_memory().unwrap();
    let trip = setup(&conn);
    let tasks = service(&conn);

    let blank = tasks
        .create_task(
            trip.owner,
            NewTask {
                trip_id: trip.trip_id,
                title: "   ".to_string(),
                assignees: Vec::new(),
            },
        )
        .unwrap();
    assert_eq!(blank.outcome.reason, MutationReason::InvalidInput);

    let foreign = tasks
        .create_task(
            trip.owner,
            NewTask {
                trip_id: trip.trip_id,
                title: "Buy gas".to_string(),
                assignees: vec![Uuid::new_v4()],
            },
        )
        .unwrap();
    assert_eq!(foreign.outcome.reason, MutationReason::InvalidInput);
    assert!(foreign.document_id.is_none());
}
