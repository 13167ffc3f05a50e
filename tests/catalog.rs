use tempfile::tempdir;

use tupledb::{
    is_attr_null, AttrType, Attribute, Catalog, CompOp, DbError, Rid, TupleBuilder,
};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn people_schema() -> Vec<Attribute> {
    vec![
        Attribute::new("age", AttrType::Int, 4),
        Attribute::new("height", AttrType::Real, 4),
        Attribute::new("name", AttrType::VarChar, 50),
    ]
}

fn person(age: i32, height: f32, name: &str) -> Vec<u8> {
    TupleBuilder::new().int(age).real(height).string(name).build()
}

fn read_int(data: &[u8], pos: usize) -> i32 {
    i32::from_le_bytes(data[pos..pos + 4].try_into().unwrap())
}

fn scan_names(catalog: &Catalog, table: &str) -> Vec<String> {
    catalog
        .scan(table, "", CompOp::NoOp, None, &["table-name".into()])
        .unwrap()
        .map(|(_, data)| {
            let len = u32::from_le_bytes(data[1..5].try_into().unwrap()) as usize;
            String::from_utf8(data[5..5 + len].to_vec()).unwrap()
        })
        .collect()
}

#[test]
fn catalog_describes_itself() {
    init_logger();
    let tmp = tempdir().unwrap();
    let catalog = Catalog::create(tmp.path()).unwrap();

    let names = scan_names(&catalog, "Tables");
    assert_eq!(names, vec!["Tables", "Columns", "Indexes"]);

    let attrs = catalog.get_attributes("Columns").unwrap();
    assert_eq!(attrs.len(), 6);
    assert_eq!(attrs[1], Attribute::new("column-name", AttrType::VarChar, 50));
}

#[test]
fn system_tables_reject_mutation_but_stay_scannable() {
    init_logger();
    let tmp = tempdir().unwrap();
    let mut catalog = Catalog::create(tmp.path()).unwrap();

    let bogus = TupleBuilder::new().int(9).string("x").string("x").int(0).build();
    assert!(matches!(
        catalog.insert_tuple("Tables", &bogus),
        Err(DbError::AccessDeniedSysTable(_))
    ));
    assert!(matches!(
        catalog.delete_table("Columns"),
        Err(DbError::AccessDeniedSysTable(_))
    ));
    assert!(matches!(
        catalog.update_tuple("Indexes", &bogus, Rid::new(0, 1)),
        Err(DbError::AccessDeniedSysTable(_))
    ));
    assert!(matches!(
        catalog.create_table("", &people_schema()),
        Err(DbError::TableNameInvalid(_))
    ));

    // The failed calls left the catalog untouched.
    let names = scan_names(&catalog, "Tables");
    assert_eq!(names, vec!["Tables", "Columns", "Indexes"]);
}

#[test]
fn table_lifecycle() {
    init_logger();
    let tmp = tempdir().unwrap();
    let mut catalog = Catalog::create(tmp.path()).unwrap();

    catalog.create_table("people", &people_schema()).unwrap();
    assert_eq!(catalog.get_attributes("people").unwrap(), people_schema());
    assert!(tmp.path().join("people").exists());

    // Table ids keep growing past the three system tables.
    catalog.create_table("pets", &people_schema()).unwrap();
    let ids: Vec<i32> = catalog
        .scan("Tables", "", CompOp::NoOp, None, &["table-id".into()])
        .unwrap()
        .map(|(_, data)| read_int(&data, 1))
        .collect();
    assert_eq!(ids, vec![0, 1, 2, 3, 4]);

    let rid = catalog.insert_tuple("people", &person(24, 185.7, "Peter")).unwrap();
    assert_eq!(
        catalog.read_tuple("people", rid).unwrap(),
        person(24, 185.7, "Peter")
    );

    catalog
        .update_tuple("people", &person(25, 185.7, "Peter"), rid)
        .unwrap();
    let height = catalog.read_attribute("people", rid, "height").unwrap();
    assert_eq!(&height[1..], &185.7f32.to_le_bytes());

    catalog.delete_tuple("people", rid).unwrap();
    assert!(matches!(
        catalog.read_tuple("people", rid),
        Err(DbError::SlotNotExistOrDeleted(_))
    ));

    catalog.delete_table("pets").unwrap();
    assert!(!tmp.path().join("pets").exists());
    assert!(matches!(
        catalog.get_attributes("pets"),
        Err(DbError::TableNotExist(_))
    ));
    assert_eq!(scan_names(&catalog, "Tables"), vec![
        "Tables", "Columns", "Indexes", "people"
    ]);
}

#[test]
fn scans_filter_tuples() {
    let tmp = tempdir().unwrap();
    let mut catalog = Catalog::create(tmp.path()).unwrap();
    catalog.create_table("people", &people_schema()).unwrap();

    for (age, name) in [(20, "ann"), (30, "bob"), (40, "cho")] {
        catalog.insert_tuple("people", &person(age, 1.7, name)).unwrap();
    }

    let value = 25i32.to_le_bytes();
    let ages: Vec<i32> = catalog
        .scan("people", "age", CompOp::Gt, Some(&value), &["age".into()])
        .unwrap()
        .map(|(_, data)| read_int(&data, 1))
        .collect();
    assert_eq!(ages, vec![30, 40]);
}

#[test]
fn indexes_follow_dml() {
    init_logger();
    let tmp = tempdir().unwrap();
    let mut catalog = Catalog::create(tmp.path()).unwrap();
    catalog.create_table("people", &people_schema()).unwrap();

    // Rows inserted before the index exists are backfilled.
    let rid_a = catalog.insert_tuple("people", &person(20, 1.6, "ann")).unwrap();
    let rid_b = catalog.insert_tuple("people", &person(30, 1.7, "bob")).unwrap();
    catalog.create_index("people", "age").unwrap();
    assert!(tmp.path().join("people_age.idx").exists());

    let hits: Vec<(i32, Rid)> = catalog
        .index_scan("people", "age", None, None, false, false)
        .unwrap()
        .map(|(key, rid)| (i32::from_le_bytes(key.try_into().unwrap()), rid))
        .collect();
    assert_eq!(hits, vec![(20, rid_a), (30, rid_b)]);

    // Inserts fan out...
    let rid_c = catalog.insert_tuple("people", &person(25, 1.8, "cho")).unwrap();
    let low = 21i32.to_le_bytes();
    let hits: Vec<Rid> = catalog
        .index_scan("people", "age", Some(&low), None, true, true)
        .unwrap()
        .map(|(_, rid)| rid)
        .collect();
    assert_eq!(hits, vec![rid_c, rid_b]);

    // ...updates move the entry to the new key...
    catalog.update_tuple("people", &person(45, 1.8, "cho"), rid_c).unwrap();
    let hits: Vec<(i32, Rid)> = catalog
        .index_scan("people", "age", None, None, false, false)
        .unwrap()
        .map(|(key, rid)| (i32::from_le_bytes(key.try_into().unwrap()), rid))
        .collect();
    assert_eq!(hits, vec![(20, rid_a), (30, rid_b), (45, rid_c)]);

    // ...and deletes remove it.
    catalog.delete_tuple("people", rid_b).unwrap();
    let hits: Vec<Rid> = catalog
        .index_scan("people", "age", None, None, false, false)
        .unwrap()
        .map(|(_, rid)| rid)
        .collect();
    assert_eq!(hits, vec![rid_a, rid_c]);

    // NULL keys are not indexed.
    let nobody = TupleBuilder::new().null().real(1.5).string("nil").build();
    catalog.insert_tuple("people", &nobody).unwrap();
    let count = catalog
        .index_scan("people", "age", None, None, false, false)
        .unwrap()
        .count();
    assert_eq!(count, 2);

    catalog.destroy_index("people", "age").unwrap();
    assert!(!tmp.path().join("people_age.idx").exists());
    assert!(matches!(
        catalog.index_scan("people", "age", None, None, false, false),
        Err(DbError::IndexNotExist(_, _))
    ));
}

#[test]
fn delete_table_drops_its_indexes() {
    let tmp = tempdir().unwrap();
    let mut catalog = Catalog::create(tmp.path()).unwrap();
    catalog.create_table("people", &people_schema()).unwrap();
    catalog.create_index("people", "age").unwrap();
    catalog.create_index("people", "name").unwrap();

    catalog.delete_table("people").unwrap();
    assert!(!tmp.path().join("people").exists());
    assert!(!tmp.path().join("people_age.idx").exists());
    assert!(!tmp.path().join("people_name.idx").exists());
    // Indexes has only its own bookkeeping left.
    let rows = catalog
        .scan("Indexes", "", CompOp::NoOp, None, &["table-id".into()])
        .unwrap()
        .count();
    assert_eq!(rows, 0);
}

#[test]
fn catalog_survives_reopen() {
    let tmp = tempdir().unwrap();
    let rid;
    {
        let mut catalog = Catalog::create(tmp.path()).unwrap();
        catalog.create_table("people", &people_schema()).unwrap();
        rid = catalog.insert_tuple("people", &person(24, 1.8, "ann")).unwrap();
    }
    let catalog = Catalog::open(tmp.path()).unwrap();
    assert_eq!(catalog.read_tuple("people", rid).unwrap(), person(24, 1.8, "ann"));

    let missing = tempdir().unwrap();
    assert!(matches!(
        Catalog::open(missing.path()),
        Err(DbError::FileNotExist(_))
    ));
}

#[test]
fn add_and_drop_attribute_version_rows() {
    init_logger();
    let tmp = tempdir().unwrap();
    let mut catalog = Catalog::create(tmp.path()).unwrap();
    catalog.create_table("people", &people_schema()).unwrap();

    let old_rid = catalog.insert_tuple("people", &person(24, 1.8, "ann")).unwrap();

    catalog
        .add_attribute("people", Attribute::new("salary", AttrType::Real, 4))
        .unwrap();
    let attrs = catalog.get_attributes("people").unwrap();
    assert_eq!(attrs.len(), 4);
    assert_eq!(attrs[3].name, "salary");

    // The old row gains a NULL salary on read.
    let upgraded = catalog.read_tuple("people", old_rid).unwrap();
    assert!(is_attr_null(&upgraded, 3));
    assert_eq!(read_int(&upgraded, 1), 24);

    // New rows carry the new column for real.
    let new_tuple = TupleBuilder::new()
        .int(30)
        .real(1.6)
        .string("bob")
        .real(1234.5)
        .build();
    let new_rid = catalog.insert_tuple("people", &new_tuple).unwrap();
    assert_eq!(catalog.read_tuple("people", new_rid).unwrap(), new_tuple);

    // Dropping a middle column re-shapes both vintages on read.
    catalog.drop_attribute("people", "height").unwrap();
    let attrs = catalog.get_attributes("people").unwrap();
    let names: Vec<&str> = attrs.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["age", "name", "salary"]);

    let old = catalog.read_tuple("people", old_rid).unwrap();
    assert_eq!(read_int(&old, 1), 24);
    assert!(is_attr_null(&old, 2));
    let new = catalog.read_tuple("people", new_rid).unwrap();
    assert_eq!(read_int(&new, 1), 30);
    assert!(!is_attr_null(&new, 2));

    assert!(matches!(
        catalog.drop_attribute("people", "height"),
        Err(DbError::AttributeNotExist(_))
    ));
}
