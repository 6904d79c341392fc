#![cfg(feature = "test-utils")]

use std::sync::Arc;

use sql_dao::prelude::*;
use sql_dao::test_utils::{Event, EventLog, RecordingDataSource};

fn pair() -> (Arc<RecordingDataSource>, Arc<RecordingDataSource>, EventLog) {
    let first = Arc::new(RecordingDataSource::new("first"));
    let log = first.log();
    let second = Arc::new(RecordingDataSource::with_log("second", log.clone()));
    (first, second, log)
}

fn touch_both(
    first: &Arc<RecordingDataSource>,
    second: &Arc<RecordingDataSource>,
) -> Result<(), SqlDaoError> {
    let update = Statement::new_without_params("UPDATE t SET x = 1");
    Dao::new(first.clone()).execute(&update)?;
    Dao::new(second.clone()).execute(&update)?;
    Ok(())
}

#[test]
fn deeply_nested_blocks_commit_once() -> Result<(), SqlDaoError> {
    let recording = Arc::new(RecordingDataSource::new("ds"));
    let dao = Dao::new(recording.clone());

    fn nest(dao: &Dao, depth: usize) -> Result<(), SqlDaoError> {
        Transactions::run(|| {
            dao.execute(&Statement::new_without_params(format!("UPDATE t SET depth = {depth}")))?;
            if depth > 1 { nest(dao, depth - 1) } else { Ok(()) }
        })
    }
    nest(&dao, 5)?;

    assert_eq!(recording.opened(), 1);
    assert_eq!(recording.commits(), 1);
    assert_eq!(recording.rollbacks(), 0);
    assert_eq!(recording.closes(), 1);
    assert!(!Transactions::is_active());
    Ok(())
}

#[test]
fn commit_failure_on_one_datasource_is_aggregated_and_the_other_still_commits() {
    let (first, second, log) = pair();
    let first_dao = Dao::new(first.clone());
    let second_dao = Dao::new(second.clone());
    first.fail_commit(true);

    let err = Transactions::run(|| {
        first_dao.execute(&Statement::new_without_params("UPDATE a SET x = 1"))?;
        second_dao.execute(&Statement::new_without_params("UPDATE b SET x = 1"))?;
        Ok(())
    })
    .unwrap_err();

    let SqlDaoError::Aggregate(aggregate) = err else {
        panic!("expected an aggregate error, got {err:?}");
    };
    assert_eq!(aggregate.len(), 1);
    assert!(matches!(aggregate.primary(), Some(SqlDaoError::Commit(_))));

    let commits: Vec<String> = log
        .lock()
        .unwrap()
        .iter()
        .filter(|(_, event)| matches!(event, Event::Commit(_)))
        .map(|(name, _)| name.clone())
        .collect();
    assert_eq!(commits, vec!["first", "second"]);
    assert_eq!(first.closes(), 1);
    assert_eq!(second.closes(), 1);
}

#[test]
fn resources_are_swept_in_first_use_order() -> Result<(), SqlDaoError> {
    let (first, second, log) = pair();
    let first_dao = Dao::new(first);
    let second_dao = Dao::new(second);

    Transactions::run(|| {
        second_dao.query(&Statement::new_without_params("SELECT 1"))?;
        first_dao.query(&Statement::new_without_params("SELECT 1"))?;
        second_dao.query(&Statement::new_without_params("SELECT 2"))?;
        Ok(())
    })?;

    let order: Vec<String> = log
        .lock()
        .unwrap()
        .iter()
        .filter(|(_, event)| matches!(event, Event::Close(_)))
        .map(|(name, _)| name.clone())
        .collect();
    assert_eq!(order, vec!["second", "first"]);
    Ok(())
}

#[test]
fn connection_is_switched_to_manual_commit_and_restored() -> Result<(), SqlDaoError> {
    let recording = Arc::new(RecordingDataSource::new("ds"));
    let dao = Dao::new(recording.clone());

    Transactions::run_in_transaction(IsolationLevel::RepeatableRead, || {
        dao.execute(&Statement::new_without_params("DELETE FROM t"))
    })?;

    assert_eq!(
        recording.events_for(0),
        vec![
            Event::Opened(0),
            Event::SetAutoCommit(0, false),
            Event::SetIsolation(0, IsolationLevel::RepeatableRead),
            Event::Execute(0, "DELETE FROM t".into()),
            Event::Commit(0),
            Event::SetAutoCommit(0, true),
            Event::SetIsolation(0, IsolationLevel::Serializable),
            Event::Close(0),
        ]
    );
    Ok(())
}

#[test]
fn rollback_failures_on_every_datasource_are_all_collected() {
    let (first, second, log) = pair();
    assert_eq!((first.name(), second.name()), ("first", "second"));
    first.fail_rollback(true);
    second.fail_rollback(true);

    Transactions::begin(IsolationLevel::default()).unwrap();
    touch_both(&first, &second).unwrap();
    let err = Transactions::rollback().unwrap_err();
    Transactions::close();

    let SqlDaoError::Aggregate(aggregate) = err else {
        panic!("expected an aggregate error, got {err:?}");
    };
    assert_eq!(aggregate.len(), 2);
    assert!(aggregate
        .errors()
        .iter()
        .all(|e| matches!(e, SqlDaoError::Rollback(_))));

    let rollbacks: Vec<String> = log
        .lock()
        .unwrap()
        .iter()
        .filter(|(_, event)| matches!(event, Event::Rollback(_)))
        .map(|(name, _)| name.clone())
        .collect();
    assert_eq!(rollbacks, vec!["first", "second"]);
    assert_eq!(first.commits() + second.commits(), 0);
    assert_eq!((first.closes(), second.closes()), (1, 1));
    assert!(!Transactions::is_active());
}

#[test]
fn rollback_restores_connection_settings() -> Result<(), SqlDaoError> {
    let recording = Arc::new(RecordingDataSource::new("ds"));
    let dao = Dao::new(recording.clone());

    let outcome = Transactions::run_in_transaction(IsolationLevel::ReadUncommitted, || {
        dao.execute(&Statement::new_without_params("DELETE FROM t"))?;
        Err::<(), _>(SqlDaoError::Other("abort".into()))
    });
    assert!(matches!(outcome, Err(SqlDaoError::Other(_))));

    assert_eq!(
        recording.events_for(0),
        vec![
            Event::Opened(0),
            Event::SetAutoCommit(0, false),
            Event::SetIsolation(0, IsolationLevel::ReadUncommitted),
            Event::Execute(0, "DELETE FROM t".into()),
            Event::Rollback(0),
            Event::SetAutoCommit(0, true),
            Event::SetIsolation(0, IsolationLevel::Serializable),
            Event::Close(0),
        ]
    );
    Ok(())
}

#[test]
fn close_without_a_transaction_is_harmless() {
    Transactions::close();
    Transactions::close();
    assert!(!Transactions::is_active());
    assert!(Transactions::commit().is_ok());
    assert!(Transactions::rollback().is_ok());
}

#[test]
fn delegated_handler_bypasses_the_ambient_transaction() -> Result<(), SqlDaoError> {
    #[derive(Debug)]
    struct Host;

    impl ExternalTransactionManager for Host {
        fn connection(&self, datasource: &DataSourceHandle) -> Result<ConnectionHandle, SqlDaoError> {
            datasource.connection()
        }

        fn release_connection(
            &self,
            connection: ConnectionHandle,
            _datasource: &DataSourceHandle,
        ) -> Result<(), SqlDaoError> {
            connection.close()
        }
    }

    let recording = Arc::new(RecordingDataSource::new("ds"));
    let dao = Dao::with_handler(
        recording.clone(),
        Arc::new(DelegatedConnectionHandler::new(Arc::new(Host))),
    );

    Transactions::run(|| {
        dao.execute(&Statement::new_without_params("UPDATE t SET x = 1"))?;
        dao.execute(&Statement::new_without_params("UPDATE t SET x = 2"))?;
        Ok(())
    })?;

    assert_eq!(recording.opened(), 2);
    assert_eq!(recording.commits(), 0);
    assert_eq!(recording.closes(), 2);
    Ok(())
}
