use tempfile::tempdir;

use tupledb::{
    AttrType, Attribute, CompOp, DbError, RecordFile, Rid, TupleBuilder,
};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn people_schema() -> Vec<Attribute> {
    vec![
        Attribute::new("age", AttrType::Int, 4),
        Attribute::new("height", AttrType::Real, 4),
        Attribute::new("name", AttrType::VarChar, 200),
    ]
}

fn people_tuple(age: i32, height: f32, name: &str) -> Vec<u8> {
    TupleBuilder::new().int(age).real(height).string(name).build()
}

#[test]
fn insert_then_read_single_tuple() {
    init_logger();
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("people");
    let attrs = people_schema();

    RecordFile::create(&path).unwrap();
    let mut file = RecordFile::open(&path).unwrap();

    let tuple = people_tuple(24, 185.7, "Peter");
    let rid = file.insert_record(&attrs, &tuple).unwrap();
    assert_eq!(rid, Rid::new(0, 1));

    assert_eq!(file.read_record(&attrs, rid).unwrap(), tuple);

    let height = file.read_attribute(&attrs, rid, "height").unwrap();
    assert_eq!(height[0], 0x00);
    assert_eq!(&height[1..], &185.7f32.to_le_bytes());
    file.close().unwrap();
}

#[test]
fn nulls_round_trip() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("people");
    let attrs = people_schema();

    RecordFile::create(&path).unwrap();
    let mut file = RecordFile::open(&path).unwrap();

    let tuple = TupleBuilder::new().null().real(170.0).null().build();
    let rid = file.insert_record(&attrs, &tuple).unwrap();
    assert_eq!(file.read_record(&attrs, rid).unwrap(), tuple);

    let name = file.read_attribute(&attrs, rid, "name").unwrap();
    assert_eq!(name, vec![0b1000_0000]);
    file.close().unwrap();
}

#[test]
fn tiny_record_is_padded_on_disk_only() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("tiny");
    // One nullable attribute: the encoded record is 6 bytes, below the
    // 8-byte pointer form, so the page pads it.
    let attrs = vec![Attribute::new("flag", AttrType::VarChar, 1)];

    RecordFile::create(&path).unwrap();
    let mut file = RecordFile::open(&path).unwrap();
    let tuple = TupleBuilder::new().null().build();
    let rid = file.insert_record(&attrs, &tuple).unwrap();
    assert_eq!(file.read_record(&attrs, rid).unwrap(), tuple);
    file.close().unwrap();
}

#[test]
fn update_grows_in_place_when_it_fits() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("people");
    let attrs = people_schema();

    RecordFile::create(&path).unwrap();
    let mut file = RecordFile::open(&path).unwrap();

    let rid_a = file.insert_record(&attrs, &people_tuple(1, 1.0, "a")).unwrap();
    let rid_b = file.insert_record(&attrs, &people_tuple(2, 2.0, "b")).unwrap();

    let bigger = people_tuple(1, 1.0, "a-much-longer-name-than-before");
    file.update_record(&attrs, &bigger, rid_a).unwrap();

    assert_eq!(file.read_record(&attrs, rid_a).unwrap(), bigger);
    assert_eq!(
        file.read_record(&attrs, rid_b).unwrap(),
        people_tuple(2, 2.0, "b")
    );
    assert_eq!(file.num_pages(), 1);
    file.close().unwrap();
}

/// Fill page 0, then grow a row past what the page can hold: the row is
/// relocated, the RID stays valid, and deleting through the old RID
/// removes the whole forwarding chain.
#[test]
fn update_relocates_when_page_is_full() {
    init_logger();
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("people");
    let attrs = people_schema();

    RecordFile::create(&path).unwrap();
    let mut file = RecordFile::open(&path).unwrap();

    let filler = "x".repeat(90);
    let mut count = 0;
    while file.num_pages() < 2 {
        file.insert_record(&attrs, &people_tuple(count, 0.5, &filler))
            .unwrap();
        count += 1;
    }

    let target = Rid::new(0, 5);
    let big = people_tuple(5, 0.5, &"y".repeat(180));
    file.update_record(&attrs, &big, target).unwrap();
    assert_eq!(file.read_record(&attrs, target).unwrap(), big);

    // Growing again re-resolves the chain and rewrites the moved record.
    let bigger = people_tuple(5, 0.5, &"z".repeat(199));
    file.update_record(&attrs, &bigger, target).unwrap();
    assert_eq!(file.read_record(&attrs, target).unwrap(), bigger);

    file.delete_record(target).unwrap();
    assert!(matches!(
        file.read_record(&attrs, target),
        Err(DbError::SlotNotExistOrDeleted(_))
    ));

    // The neighbours on page 0 are untouched.
    assert_eq!(
        file.read_record(&attrs, Rid::new(0, 4)).unwrap(),
        people_tuple(3, 0.5, &filler)
    );
    file.close().unwrap();
}

#[test]
fn deleted_slot_is_reused_by_the_next_insert() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("people");
    let attrs = people_schema();

    RecordFile::create(&path).unwrap();
    let mut file = RecordFile::open(&path).unwrap();

    let _a = file.insert_record(&attrs, &people_tuple(1, 1.0, "a")).unwrap();
    let b = file.insert_record(&attrs, &people_tuple(2, 2.0, "b")).unwrap();
    let _c = file.insert_record(&attrs, &people_tuple(3, 3.0, "c")).unwrap();

    file.delete_record(b).unwrap();
    let d = file.insert_record(&attrs, &people_tuple(4, 4.0, "d")).unwrap();
    assert_eq!(d, b);

    assert!(matches!(
        file.delete_record(Rid::new(0, 9)),
        Err(DbError::SlotNotExistOrDeleted(9))
    ));
    assert!(matches!(
        file.read_record(&attrs, Rid::new(9, 1)),
        Err(DbError::PageNotExist(9))
    ));
    file.close().unwrap();
}

/// Ages 1..=10, even slots deleted, condition `age > 0`: the survivors
/// come back in insertion order.
#[test]
fn scan_skips_tombstones() {
    init_logger();
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("ages");
    let attrs = vec![Attribute::new("age", AttrType::Int, 4)];

    RecordFile::create(&path).unwrap();
    let mut file = RecordFile::open(&path).unwrap();

    let mut rids = Vec::new();
    for age in 1..=10 {
        rids.push(
            file.insert_record(&attrs, &TupleBuilder::new().int(age).build())
                .unwrap(),
        );
    }
    for rid in &rids {
        if rid.slot % 2 == 0 {
            file.delete_record(*rid).unwrap();
        }
    }

    let value = 0i32.to_le_bytes();
    let ages: Vec<i32> = file
        .scan(&attrs, "age", CompOp::Gt, Some(&value), &["age".into()])
        .unwrap()
        .map(|(_, data)| i32::from_le_bytes(data[1..5].try_into().unwrap()))
        .collect();
    assert_eq!(ages, vec![1, 3, 5, 7, 9]);
    file.close().unwrap();
}

#[test]
fn scan_conditions_are_typed_and_null_never_matches() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("people");
    let attrs = people_schema();

    RecordFile::create(&path).unwrap();
    let mut file = RecordFile::open(&path).unwrap();

    file.insert_record(&attrs, &people_tuple(30, 1.60, "ann")).unwrap();
    file.insert_record(&attrs, &people_tuple(40, 1.80, "bob")).unwrap();
    file.insert_record(
        &attrs,
        &TupleBuilder::new().null().real(1.70).string("nil").build(),
    )
    .unwrap();

    let value = 35i32.to_le_bytes();
    let names: Vec<String> = file
        .scan(&attrs, "age", CompOp::Le, Some(&value), &["name".into()])
        .unwrap()
        .map(|(_, data)| String::from_utf8(data[5..].to_vec()).unwrap())
        .collect();
    // The NULL-aged row does not qualify even for <=.
    assert_eq!(names, vec!["ann"]);

    let everyone: Vec<_> = file
        .scan(&attrs, "", CompOp::NoOp, None, &["name".into()])
        .unwrap()
        .collect();
    assert_eq!(everyone.len(), 3);

    let value = varchar("bob");
    let ages: Vec<i32> = file
        .scan(&attrs, "name", CompOp::Eq, Some(&value), &["age".into()])
        .unwrap()
        .map(|(_, data)| i32::from_le_bytes(data[1..5].try_into().unwrap()))
        .collect();
    assert_eq!(ages, vec![40]);
    file.close().unwrap();
}

#[test]
fn scan_spans_pages() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("people");
    let attrs = people_schema();

    RecordFile::create(&path).unwrap();
    let mut file = RecordFile::open(&path).unwrap();

    let filler = "f".repeat(120);
    let total = 80;
    for i in 0..total {
        file.insert_record(&attrs, &people_tuple(i, 0.0, &filler))
            .unwrap();
    }
    assert!(file.num_pages() > 1);

    let rows: Vec<i32> = file
        .scan(&attrs, "", CompOp::NoOp, None, &["age".into()])
        .unwrap()
        .map(|(_, data)| i32::from_le_bytes(data[1..5].try_into().unwrap()))
        .collect();
    assert_eq!(rows, (0..total).collect::<Vec<_>>());
    file.close().unwrap();
}

fn varchar(value: &str) -> Vec<u8> {
    let mut out = (value.len() as u32).to_le_bytes().to_vec();
    out.extend_from_slice(value.as_bytes());
    out
}
