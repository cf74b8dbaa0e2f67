use chrono::{DateTime, Utc};
use keel::prelude::*;
use pretty_assertions::assert_eq;
use uuid::Uuid;

struct Sprocket {
    id: Column<i32>,
    email: Column<String>,
}

keel::table_record!(Sprocket { id, email });

struct Widget {
    id: Column<i32>,
    sprocket: Column<i32>,
    name: Column<String>,
}

keel::table_record!(Widget { id, sprocket, name });

fn open() -> (Database, Table<Sprocket>, Table<Widget>) {
    let db = Database::open_in_memory().expect("in-memory database");
    let sprockets = db
        .table("tables", |f| Sprocket {
            id: f.integer("id", Keys::AUTOINCREMENT),
            email: f.string("email", Keys::NONE),
        })
        .unwrap();
    let widgets = db
        .table("widgets", |f| Widget {
            id: f.integer("id", Keys::AUTOINCREMENT),
            sprocket: f.integer("xtable", Keys::NONE),
            name: f.string("name", Keys::NULLABLE),
        })
        .unwrap();
    db.migrate().unwrap();
    (db, sprockets, widgets)
}

fn add_sprocket(sprockets: &Table<Sprocket>, email: &str) -> Sprocket {
    let mut s = sprockets.create();
    s.email.set(email.to_string());
    s.insert().unwrap();
    s
}

fn add_widget(widgets: &Table<Widget>, sprocket: i32, name: Option<&str>) -> Widget {
    let mut w = widgets.create();
    w.sprocket.set(sprocket);
    w.name.set(name.map(str::to_string));
    w.insert().unwrap();
    w
}

fn three_sprockets(sprockets: &Table<Sprocket>) {
    add_sprocket(sprockets, "one@example.com");
    add_sprocket(sprockets, "two@example.com");
    add_sprocket(sprockets, "three@example.com");
}

#[test]
fn test_insert_then_select_round_trip() {
    let (_db, sprockets, _) = open();
    let s = add_sprocket(&sprockets, "a@example.com");
    assert_eq!(s.id.get(), Some(&1));
    assert!(!s.is_dirty());

    let found = sprockets
        .filter(|r| r.id.is(1))
        .select()
        .unwrap()
        .get()
        .unwrap()
        .expect("row 1");
    assert_eq!(found.id.get(), Some(&1));
    assert_eq!(found.email.get().map(String::as_str), Some("a@example.com"));
    assert!(!found.is_dirty());
}

#[test]
fn test_order_count_and_delete_all() {
    let (_db, sprockets, _) = open();
    three_sprockets(&sprockets);

    let first = sprockets
        .all()
        .order(|s| Order::asc(&s.id))
        .select()
        .unwrap()
        .get()
        .unwrap()
        .unwrap();
    assert_eq!(first.id.get(), Some(&1));

    let last = sprockets
        .all()
        .order(|s| Order::desc(&s.id))
        .first()
        .select()
        .unwrap()
        .get()
        .unwrap()
        .unwrap();
    assert_eq!(last.id.get(), Some(&3));

    assert_eq!(sprockets.count().unwrap(), 3);
    sprockets.all().delete().unwrap();
    assert_eq!(sprockets.count().unwrap(), 0);
}

#[test]
fn test_aggregates() {
    let (_db, sprockets, _) = open();
    assert_eq!(sprockets.all().max(|s| &s.id).unwrap(), None);

    three_sprockets(&sprockets);
    assert_eq!(sprockets.all().min(|s| &s.id).unwrap(), Some(1));
    assert_eq!(sprockets.all().max(|s| &s.id).unwrap(), Some(3));
    assert_eq!(sprockets.all().sum(|s| &s.id).unwrap(), Some(6));
    assert_eq!(sprockets.all().avg(|s| &s.id).unwrap(), Some(2.0));
    assert_eq!(
        sprockets.filter(|s| s.id.gt(1)).min(|s| &s.email).unwrap(),
        Some("three@example.com".to_string())
    );
}

#[test]
fn test_filtered_ordered_limited_select() {
    let (_db, sprockets, _) = open();
    three_sprockets(&sprockets);

    let query = sprockets
        .filter(|s| s.id.ge(2))
        .filter(|s| s.email.like("%example.com"))
        .order(|s| Order::desc(&s.id))
        .first_n(5);
    let statement = query.to_sql().unwrap();
    assert_eq!(
        statement.sql,
        "SELECT * FROM tables t0 WHERE (t0.db_id >= ?) AND (t0.db_email LIKE ?) \
         ORDER BY t0.db_id DESC LIMIT 5"
    );
    assert_eq!(
        statement.params,
        vec![SqlValue::Integer(2), SqlValue::Text("%example.com".into())]
    );

    let ids: Vec<i32> = query
        .select()
        .unwrap()
        .map(|s| *s.unwrap().id.get().unwrap())
        .collect();
    assert_eq!(ids, vec![3, 2]);
}

#[test]
fn test_update_only_dirty_columns() {
    let (_db, sprockets, _) = open();
    let mut s = add_sprocket(&sprockets, "old@example.com");

    assert!(!s.update().unwrap());

    s.email.set("new@example.com".to_string());
    assert!(s.update().unwrap());
    assert!(!s.is_dirty());

    let found = sprockets
        .filter(|r| r.email.is("new@example.com".to_string()))
        .select()
        .unwrap()
        .collect_all()
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id.get(), s.id.get());
}

#[test]
fn test_dirty_key_is_rejected() {
    let (_db, sprockets, _) = open();
    let mut s = add_sprocket(&sprockets, "a@example.com");
    s.id.set(99);
    s.email.set("b@example.com".to_string());

    assert!(s.update().unwrap_err().is_constraint_violation());
    assert!(s.delete().unwrap_err().is_constraint_violation());

    let stored = sprockets.all().select().unwrap().collect_all().unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].email.get().map(String::as_str), Some("a@example.com"));
}

#[test]
fn test_delete_record_by_key() {
    let (_db, sprockets, _) = open();
    three_sprockets(&sprockets);
    let mut two = sprockets
        .filter(|s| s.id.is(2))
        .select()
        .unwrap()
        .get()
        .unwrap()
        .unwrap();
    two.delete().unwrap();

    assert_eq!(sprockets.count().unwrap(), 2);
    assert_eq!(sprockets.filter(|s| s.id.is(2)).count().unwrap(), 0);
}

#[test]
fn test_null_into_non_nullable_never_reaches_storage() {
    let (_db, sprockets, widgets) = open();
    let mut s = sprockets.create();
    assert!(s.insert().unwrap_err().is_constraint_violation());
    assert_eq!(sprockets.count().unwrap(), 0);

    let w = add_widget(&widgets, 1, None);
    let stored = widgets
        .filter(|r| r.id.is_value_of(&w.id))
        .select()
        .unwrap()
        .get()
        .unwrap()
        .unwrap();
    assert_eq!(stored.name.get(), None);
    assert_eq!(widgets.filter(|r| r.name.is(None)).count().unwrap(), 1);
}

#[test]
fn test_join_filter_populates_both_sides() {
    let (_db, sprockets, widgets) = open();
    three_sprockets(&sprockets);
    add_widget(&widgets, 1, Some("alpha"));
    add_widget(&widgets, 2, Some("beta"));
    add_widget(&widgets, 2, Some("gamma"));

    let joined = widgets
        .join(&sprockets, |j| j.left.sprocket.is_column(&j.right.id))
        .unwrap();
    assert_eq!(joined.count().unwrap(), 3);

    let rows = joined
        .filter(|j| j.right.email.is("two@example.com".to_string()))
        .order(|j| Order::asc(&j.left.id))
        .select()
        .unwrap()
        .collect_all()
        .unwrap();
    assert_eq!(rows.len(), 2);
    for row in &rows {
        assert_eq!(row.left.sprocket.get(), Some(&2));
        assert_eq!(row.right.id.get(), Some(&2));
        assert_eq!(row.right.email.get().map(String::as_str), Some("two@example.com"));
    }
    let names: Vec<&str> = rows
        .iter()
        .map(|r| r.left.name.get().unwrap().as_str())
        .collect();
    assert_eq!(names, vec!["beta", "gamma"]);
}

#[test]
fn test_self_join_gets_distinct_aliases() {
    let (_db, sprockets, _) = open();
    three_sprockets(&sprockets);

    let pairs = sprockets
        .join(&sprockets, |j| j.left.id.lt_column(&j.right.id))
        .unwrap();
    let statement = pairs.filter(|j| j.right.id.is(3)).to_sql().unwrap();
    assert_eq!(
        statement.sql,
        "SELECT * FROM tables t0 INNER JOIN tables t1 ON t0.db_id < t1.db_id WHERE t1.db_id = ?"
    );

    let rows = pairs
        .filter(|j| j.right.id.is(3))
        .order(|j| Order::asc(&j.left.id))
        .select()
        .unwrap()
        .collect_all()
        .unwrap();
    let left: Vec<i32> = rows.iter().map(|r| *r.left.id.get().unwrap()).collect();
    assert_eq!(left, vec![1, 2]);
    assert!(rows.iter().all(|r| r.right.id.get() == Some(&3)));
}

#[test]
fn test_join_cannot_delete() {
    let (_db, sprockets, widgets) = open();
    let joined = widgets
        .join(&sprockets, |j| j.left.sprocket.is_column(&j.right.id))
        .unwrap();
    assert!(matches!(
        joined.all().delete(),
        Err(KeelError::InvalidUsage(_))
    ));
}

#[test]
fn test_foreign_column_is_unresolved() {
    let (_db, sprockets, widgets) = open();
    let helper = widgets.create();
    let err = sprockets
        .filter(|_| helper.id.is(1))
        .select()
        .err()
        .expect("foreign column");
    assert!(matches!(err, KeelError::UnresolvedReference { .. }));
}

#[test]
fn test_projection_leaves_other_columns_unset() {
    let (_db, sprockets, _) = open();
    three_sprockets(&sprockets);
    let rows = sprockets
        .all()
        .order(|s| Order::asc(&s.id))
        .select_only(|s| Projection::only(&[&s.email]))
        .unwrap()
        .collect_all()
        .unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].id.get(), None);
    assert_eq!(rows[0].email.get().map(String::as_str), Some("one@example.com"));
}

#[test]
fn test_join_projection_fills_the_selected_side() {
    let (_db, sprockets, widgets) = open();
    three_sprockets(&sprockets);
    add_widget(&widgets, 2, Some("beta"));

    let joined = widgets
        .join(&sprockets, |j| j.left.sprocket.is_column(&j.right.id))
        .unwrap();
    let rows = joined
        .all()
        .select_only(|j| Projection::only(&[&j.right.id]))
        .unwrap()
        .collect_all()
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].left.id.get(), None);
    assert_eq!(rows[0].right.id.get(), Some(&2));

    let both = joined
        .all()
        .select_only(|j| Projection::only(&[&j.right.id, &j.left.id, &j.left.name]))
        .unwrap()
        .get()
        .unwrap()
        .unwrap();
    assert_eq!(both.left.id.get(), Some(&1));
    assert_eq!(both.left.name.get().map(String::as_str), Some("beta"));
    assert_eq!(both.left.sprocket.get(), None);
    assert_eq!(both.right.id.get(), Some(&2));
    assert_eq!(both.right.email.get(), None);
}

#[test]
fn test_left_deep_three_table_join() {
    let (_db, sprockets, widgets) = open();
    three_sprockets(&sprockets);
    add_widget(&widgets, 1, Some("alpha"));
    add_widget(&widgets, 2, Some("beta"));

    let pairs = widgets
        .join(&sprockets, |j| j.left.sprocket.is_column(&j.right.id))
        .unwrap();
    let triples = pairs
        .join(&sprockets, |j| {
            j.left.right.id.is_column(&j.right.id).and(j.right.id.gt(1))
        })
        .unwrap();
    let query = triples.filter(|j| j.right.email.is("two@example.com".to_string()));

    let statement = query.to_sql().unwrap();
    assert_eq!(
        statement.sql,
        "SELECT * FROM widgets t0 \
         INNER JOIN tables t1 ON t0.db_xtable = t1.db_id \
         INNER JOIN tables t2 ON (t1.db_id = t2.db_id) AND (t2.db_id > ?) \
         WHERE t2.db_email = ?"
    );
    assert_eq!(
        statement.params,
        vec![SqlValue::Integer(1), SqlValue::Text("two@example.com".into())]
    );

    let rows = query.select().unwrap().collect_all().unwrap();
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.left.left.name.get().map(String::as_str), Some("beta"));
    assert_eq!(row.left.left.sprocket.get(), Some(&2));
    assert_eq!(row.left.right.id.get(), Some(&2));
    assert_eq!(row.left.right.email.get().map(String::as_str), Some("two@example.com"));
    assert_eq!(row.right.id.get(), Some(&2));
    assert_eq!(row.right.email.get().map(String::as_str), Some("two@example.com"));
}

#[test]
fn test_right_nested_three_table_join() {
    let (_db, sprockets, widgets) = open();
    three_sprockets(&sprockets);
    add_widget(&widgets, 1, Some("alpha"));
    add_widget(&widgets, 2, Some("beta"));

    let inner = widgets
        .join(&sprockets, |j| {
            j.left.sprocket.is_column(&j.right.id).and(j.right.id.gt(0))
        })
        .unwrap();
    let nested = widgets
        .join(&inner, |j| j.left.id.is_column(&j.right.left.id))
        .unwrap();
    let query = nested.filter(|j| j.right.right.email.is("two@example.com".to_string()));

    let statement = query.to_sql().unwrap();
    assert_eq!(
        statement.sql,
        "SELECT * FROM widgets t0 \
         INNER JOIN (widgets t1 INNER JOIN tables t2 ON (t1.db_xtable = t2.db_id) AND (t2.db_id > ?)) \
         ON t0.db_id = t1.db_id \
         WHERE t2.db_email = ?"
    );
    assert_eq!(
        statement.params,
        vec![SqlValue::Integer(0), SqlValue::Text("two@example.com".into())]
    );

    let rows = query.select().unwrap().collect_all().unwrap();
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.left.id.get(), Some(&2));
    assert_eq!(row.left.name.get().map(String::as_str), Some("beta"));
    assert_eq!(row.right.left.id.get(), Some(&2));
    assert_eq!(row.right.left.sprocket.get(), Some(&2));
    assert_eq!(row.right.right.id.get(), Some(&2));
    assert_eq!(row.right.right.email.get().map(String::as_str), Some("two@example.com"));
}

#[test]
fn test_custom_sql_marshals_by_name() {
    let (_db, sprockets, _) = open();
    three_sprockets(&sprockets);
    let rows = sprockets
        .select_sql(
            "SELECT db_email FROM tables WHERE db_id <> ? ORDER BY db_id",
            &[SqlValue::Integer(2)],
        )
        .unwrap()
        .collect_all()
        .unwrap();
    let emails: Vec<&str> = rows
        .iter()
        .map(|r| r.email.get().unwrap().as_str())
        .collect();
    assert_eq!(emails, vec!["one@example.com", "three@example.com"]);
    assert!(rows.iter().all(|r| r.id.get().is_none()));
}

#[test]
fn test_copy_key_addresses_same_row() {
    let (_db, sprockets, _) = open();
    let original = add_sprocket(&sprockets, "a@example.com");
    let mut copy = sprockets.copy_key(&original).unwrap();
    assert_eq!(copy.id.get(), Some(&1));
    assert_eq!(copy.email.get(), None);

    copy.email.set("b@example.com".to_string());
    assert!(copy.update().unwrap());
    assert_eq!(
        sprockets.filter(|s| s.email.is("b@example.com".to_string())).count().unwrap(),
        1
    );
}

#[test]
fn test_invalid_key_spec_fails_before_ddl() {
    struct Broken {
        id: Column<i32>,
        code: Column<String>,
    }
    keel::table_record!(Broken { id, code });

    let db = Database::open_in_memory().unwrap();
    let sprockets = db
        .table("tables", |f| Sprocket {
            id: f.integer("id", Keys::AUTOINCREMENT),
            email: f.string("email", Keys::NONE),
        })
        .unwrap();
    db.table("broken", |f| Broken {
        id: f.integer("id", Keys::AUTOINCREMENT),
        code: f.string("code", Keys::KEY),
    })
    .unwrap();

    let err = db.migrate().unwrap_err();
    assert!(err.is_constraint_violation());
    assert!(err.to_string().contains("broken"));
    assert!(!db.table_exists(sprockets.name()).unwrap());
    assert!(!db.table_exists("__version").unwrap());
}

#[test]
fn test_duplicate_column_rejected_at_declaration() {
    let db = Database::open_in_memory().unwrap();
    let result = db.table("tables", |f| Sprocket {
        id: f.integer("id", Keys::AUTOINCREMENT),
        email: f.string("id", Keys::NONE),
    });
    assert!(result.unwrap_err().is_constraint_violation());
}

#[derive(Debug, Clone, PartialEq)]
enum Finish {
    Matte,
    Gloss,
}

impl Enumerated for Finish {
    fn to_id(&self) -> i32 {
        match self {
            Finish::Matte => 1,
            Finish::Gloss => 2,
        }
    }

    fn from_id(id: i32) -> Option<Self> {
        match id {
            1 => Some(Finish::Matte),
            2 => Some(Finish::Gloss),
            _ => None,
        }
    }
}

struct Sample {
    id: Column<i64>,
    ratio: Column<f64>,
    weights: Column<Vec<f64>>,
    active: Column<bool>,
    made: Column<DateTime<Utc>>,
    serial: Column<Uuid>,
    finish: Column<Finish>,
}

keel::table_record!(Sample { id, ratio, weights, active, made, serial, finish });

#[test]
fn test_every_column_type_round_trips() {
    let db = Database::open_in_memory().unwrap();
    let samples = db
        .table("samples", |f| Sample {
            id: f.long("id", Keys::KEY),
            ratio: f.double("ratio", Keys::NONE),
            weights: f.double_array("weights", Keys::NONE),
            active: f.boolean("active", Keys::NONE),
            made: f.date("made", Keys::NONE),
            serial: f.uuid("serial", Keys::NONE),
            finish: f.enumerated("finish", Keys::NULLABLE),
        })
        .unwrap();
    db.migrate().unwrap();

    let made = DateTime::<Utc>::from_timestamp_millis(1_700_000_000_123).unwrap();
    let serial = Uuid::new_v4();
    let mut s = samples.create();
    s.id.set(5_000_000_000);
    s.ratio.set(0.25);
    s.weights.set(vec![1.5, -2.0, 3.25]);
    s.active.set(true);
    s.made.set(made);
    s.serial.set(serial);
    s.finish.set(Finish::Gloss);
    s.insert().unwrap();

    let found = samples
        .filter(|r| r.id.is(5_000_000_000))
        .select()
        .unwrap()
        .get()
        .unwrap()
        .unwrap();
    assert_eq!(found.ratio.get(), Some(&0.25));
    assert_eq!(found.weights.get(), Some(&vec![1.5, -2.0, 3.25]));
    assert_eq!(found.active.get(), Some(&true));
    assert_eq!(found.made.get(), Some(&made));
    assert_eq!(found.serial.get(), Some(&serial));
    assert_eq!(found.finish.get(), Some(&Finish::Gloss));
}

#[test]
fn test_reopened_file_is_not_migrated_twice() {
    let path = std::env::temp_dir().join(format!("keel-{}.db", Uuid::new_v4()));
    let config = Config::default().with_url(format!("sqlite://{}", path.display()));

    let declare = |db: &Database| {
        db.table("tables", |f| Sprocket {
            id: f.integer("id", Keys::AUTOINCREMENT),
            email: f.string("email", Keys::NONE),
        })
        .unwrap()
    };

    {
        let db = Database::open(&config).unwrap();
        let sprockets = declare(&db);
        db.migrate().unwrap();
        assert!(db.is_migrated("tables"));
        db.migrate().unwrap();
        add_sprocket(&sprockets, "kept@example.com");
        db.close().unwrap();
    }

    let db = Database::open(&config).unwrap();
    let sprockets = declare(&db);
    db.migrate().unwrap();
    assert_eq!(sprockets.count().unwrap(), 1);
    db.close().unwrap();

    let _ = std::fs::remove_file(&path);
}
