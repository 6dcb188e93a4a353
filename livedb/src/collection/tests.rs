//! The collection contract, checked against every way of obtaining a
//! collection.

use super::*;
use crate::config::StoreConfig;
use crate::notify::{ChangeSet, CollectionChange, SubscriptionState};
use chrono::TimeZone;
use chrono::Utc;
use pretty_assertions::assert_eq;

const SCHEMA: &str = r#"
classes:
  AggregateObject:
    properties:
      intCol: { type: int }
      int8Col: { type: int8 }
      int16Col: { type: int16 }
      int32Col: { type: int32 }
      int64Col: { type: int64 }
      floatCol: { type: float }
      doubleCol: { type: double }
      boolCol: { type: bool }
      dateCol: { type: date }
      trueCol: { type: bool, default: true }
      stringListCol: { type: list, target: StringObjectWithLink }
      linkCol: { type: link, target: LinkTarget }
  AggregateObjectList:
    properties:
      list: { type: list, target: AggregateObject }
  StringObjectWithLink:
    properties:
      stringCol: { type: string }
      linkCol: { type: link, target: LinkTarget }
  LinkTarget:
    properties:
      id: { type: int }
      stringObjects: { type: linking_objects, origin: StringObjectWithLink, property: linkCol }
  StringList:
    properties:
      array: { type: list, target: StringObjectWithLink }
"#;

const CLASS: &str = "StringObjectWithLink";

#[derive(Debug, Clone, Copy, PartialEq)]
enum Variant {
    Table,
    TableView,
    ListView,
    List,
    Linking,
    Unmanaged,
}

const ALL: [Variant; 6] = [
    Variant::Table,
    Variant::TableView,
    Variant::ListView,
    Variant::List,
    Variant::Linking,
    Variant::Unmanaged,
];

const MANAGED: [Variant; 5] = [
    Variant::Table,
    Variant::TableView,
    Variant::ListView,
    Variant::List,
    Variant::Linking,
];

struct Fixture {
    store: Store,
    str1: Object,
    str2: Object,
    /// The StringList or LinkTarget behind list and linking variants.
    holder: Option<Object>,
    collection: Collection,
}

fn fixture_with(variant: Variant, config: StoreConfig) -> Fixture {
    let store = Store::open_with(config).unwrap();
    let (str1, str2, holder) = store
        .write(|s| {
            let str1 = s.create(CLASS, &[("stringCol", "1".into())])?;
            let str2 = s.create(CLASS, &[("stringCol", "2".into())])?;
            let holder = match variant {
                Variant::ListView | Variant::List => {
                    let holder = s.create("StringList", &[])?;
                    holder.list("array")?.append(&str1)?;
                    holder.list("array")?.append(&str2)?;
                    Some(holder)
                }
                Variant::Linking => {
                    let holder = s.create("LinkTarget", &[("id", Value::Int(0))])?;
                    str1.set("linkCol", holder.key())?;
                    str2.set("linkCol", holder.key())?;
                    Some(holder)
                }
                _ => None,
            };
            Ok((str1, str2, holder))
        })
        .unwrap();

    let collection = match variant {
        Variant::Table => store.objects(CLASS).unwrap(),
        Variant::TableView => store
            .objects(CLASS)
            .unwrap()
            .filter(Predicate::ne("stringCol", ""))
            .unwrap(),
        Variant::ListView => holder
            .as_ref()
            .unwrap()
            .list("array")
            .unwrap()
            .filter(Predicate::True)
            .unwrap(),
        Variant::List => holder.as_ref().unwrap().list("array").unwrap(),
        Variant::Linking => holder.as_ref().unwrap().linking_objects("stringObjects").unwrap(),
        Variant::Unmanaged => {
            let list = Collection::unmanaged(CLASS);
            list.append(&str1).unwrap();
            list.append(&str2).unwrap();
            list
        }
    };

    Fixture {
        store,
        str1,
        str2,
        holder,
        collection,
    }
}

fn fixture(variant: Variant) -> Fixture {
    fixture_with(variant, StoreConfig::in_memory_yaml(SCHEMA).unwrap())
}

/// Add one more element the way each variant grows.
fn add_element(f: &Fixture, variant: Variant) {
    f.store
        .write(|s| {
            let obj = s.create(CLASS, &[("stringCol", "a".into())])?;
            match variant {
                Variant::ListView | Variant::List => {
                    f.holder.as_ref().unwrap().list("array")?.append(&obj)
                }
                Variant::Linking => obj.set("linkCol", f.holder.as_ref().unwrap().key()),
                _ => Ok(()),
            }
        })
        .unwrap();
}

fn strings(collection: &Collection) -> Vec<String> {
    collection
        .value_for_key("stringCol")
        .unwrap()
        .into_values()
        .unwrap()
        .iter()
        .map(|v| v.to_string())
        .collect()
}

fn is_capability<T>(result: Result<T>) -> bool {
    matches!(result, Err(LiveDbError::Capability(_)))
}

#[test]
fn test_count() {
    for variant in ALL {
        let f = fixture(variant);
        assert_eq!(f.collection.count().unwrap(), 2, "{variant:?}");
        assert!(!f.collection.is_empty().unwrap());
    }
}

#[test]
fn test_kind_and_store() {
    for variant in ALL {
        let f = fixture(variant);
        let expected = match variant {
            Variant::List | Variant::Unmanaged => CollectionKind::List,
            Variant::Linking => CollectionKind::LinkingObjects,
            _ => CollectionKind::Results,
        };
        assert_eq!(f.collection.kind(), expected, "{variant:?}");
        assert_eq!(f.collection.class_name(), CLASS);
        assert_eq!(f.collection.is_managed(), variant != Variant::Unmanaged);
        if let Some(store) = f.collection.store() {
            assert_eq!(store.path(), f.store.path());
        }
    }
}

#[test]
fn test_subscript() {
    for variant in ALL {
        let f = fixture(variant);
        assert_eq!(f.collection.get(0).unwrap(), f.str1, "{variant:?}");
        assert_eq!(f.collection.get(1).unwrap(), f.str2);
        assert!(matches!(
            f.collection.get(2),
            Err(LiveDbError::OutOfRange { index: 2, count: 2 })
        ));
        assert!(matches!(
            f.collection.at(-1),
            Err(LiveDbError::OutOfRange { index: -1, count: 2 })
        ));
        assert_eq!(f.collection.at(1).unwrap(), f.str2);
    }
}

#[test]
fn test_first_and_last() {
    for variant in ALL {
        let f = fixture(variant);
        assert_eq!(f.collection.first().unwrap(), Some(f.str1.clone()), "{variant:?}");
        assert_eq!(f.collection.last().unwrap(), Some(f.str2.clone()));
    }
    let empty = Collection::unmanaged(CLASS);
    assert_eq!(empty.first().unwrap(), None);
    assert_eq!(empty.last().unwrap(), None);
}

#[test]
fn test_index_of_object() {
    for variant in ALL {
        let f = fixture(variant);
        assert_eq!(f.collection.index_of(&f.str1).unwrap(), Some(0), "{variant:?}");
        assert_eq!(f.collection.index_of(&f.str2).unwrap(), Some(1));
    }
    for variant in MANAGED {
        let f = fixture(variant);
        let str1_only = f.collection.filter(Predicate::eq("stringCol", "1")).unwrap();
        assert_eq!(str1_only.index_of(&f.str2).unwrap(), None, "{variant:?}");
    }
}

#[test]
fn test_index_of_wrong_class_fails() {
    let f = fixture(Variant::Table);
    let target = f
        .store
        .write(|s| s.create("LinkTarget", &[("id", Value::Int(1))]))
        .unwrap();
    assert!(matches!(
        f.collection.index_of(&target),
        Err(LiveDbError::Validation(_))
    ));
}

#[test]
fn test_index_matching() {
    for variant in ALL {
        let f = fixture(variant);
        let c = &f.collection;
        assert_eq!(c.index_matching(&Predicate::eq("stringCol", "1")).unwrap(), Some(0));
        assert_eq!(c.index_matching(&Predicate::eq("stringCol", "2")).unwrap(), Some(1));
        assert_eq!(c.index_matching(&Predicate::eq("stringCol", "3")).unwrap(), None);
        assert!(matches!(
            c.index_matching(&Predicate::eq("noSuchCol", "1")),
            Err(LiveDbError::InvalidProperty { .. })
        ));
    }
}

#[test]
fn test_value_for_key() {
    for variant in ALL {
        let f = fixture(variant);
        assert_eq!(strings(&f.collection), vec!["1", "2"], "{variant:?}");
        let objects = f.collection.value_for_key("self").unwrap().into_objects().unwrap();
        assert_eq!(objects, vec![f.str1.clone(), f.str2.clone()]);
        assert!(matches!(
            f.collection.value_for_key("noSuchCol"),
            Err(LiveDbError::InvalidProperty { .. })
        ));
    }
}

#[test]
fn test_value_for_key_path() {
    for variant in MANAGED {
        let f = fixture(variant);
        let c = &f.collection;
        assert_eq!(c.value_for_key_path("@count").unwrap(), KeyPathValue::Count(2));
        assert_eq!(
            c.value_for_key_path("@unionOfObjects.stringCol").unwrap(),
            KeyPathValue::Values(vec![Value::from("1"), Value::from("2")])
        );
        let ids = c.value_for_key_path("linkCol.id").unwrap().into_values().unwrap();
        if variant == Variant::Linking {
            assert_eq!(ids, vec![Value::Int(0), Value::Int(0)]);
            assert_eq!(
                c.value_for_key_path("@distinctUnionOfObjects.linkCol.id").unwrap(),
                KeyPathValue::Values(vec![Value::Int(0)])
            );
        } else {
            assert_eq!(ids, vec![Value::Null, Value::Null], "{variant:?}");
        }
        assert!(matches!(
            c.value_for_key_path("@median.stringCol"),
            Err(LiveDbError::InvalidProperty { .. })
        ));
        assert!(matches!(
            c.value_for_key_path("stringCol.length"),
            Err(LiveDbError::InvalidProperty { .. })
        ));
    }
}

#[test]
fn test_set_value_for_key() {
    for variant in ALL {
        let f = fixture(variant);
        assert!(matches!(
            f.collection.set_value_for_key("stringCol", "0"),
            Err(LiveDbError::WriteRequired(_))
        ));
        f.store
            .write(|_| f.collection.set_value_for_key("stringCol", "0"))
            .unwrap();
        assert_eq!(strings(&f.collection), vec!["0", "0"], "{variant:?}");
        assert_eq!(f.str1.get("stringCol").unwrap(), Value::from("0"));
    }
}

#[test]
fn test_filter() {
    for variant in MANAGED {
        let f = fixture(variant);
        let filtered = f.collection.filter(Predicate::eq("stringCol", "1")).unwrap();
        assert_eq!(filtered.count().unwrap(), 1, "{variant:?}");
        assert_eq!(filtered.kind(), CollectionKind::Results);
        let none = f.collection.filter(Predicate::eq("stringCol", "0")).unwrap();
        assert_eq!(none.count().unwrap(), 0);
        let like = f.collection.filter(Predicate::like("stringCol", "_")).unwrap();
        assert_eq!(like.count().unwrap(), 2);
    }
    let f = fixture(Variant::Unmanaged);
    assert!(is_capability(f.collection.filter(Predicate::True)));
}

#[test]
fn test_filter_is_live() {
    for variant in MANAGED {
        let f = fixture(variant);
        let filtered = f.collection.filter(Predicate::ne("stringCol", "2")).unwrap();
        assert_eq!(filtered.count().unwrap(), 1);
        add_element(&f, variant);
        f.store.refresh().unwrap();
        assert_eq!(filtered.count().unwrap(), 2, "{variant:?}");
        assert_eq!(f.collection.count().unwrap(), 3);
    }
}

#[test]
fn test_sort() {
    for variant in MANAGED {
        let f = fixture(variant);
        let c = &f.collection;
        let descending = c.sorted_by("stringCol", false).unwrap();
        assert_eq!(strings(&descending), vec!["2", "1"], "{variant:?}");
        let unchanged = c.sorted(&[]).unwrap();
        assert_eq!(strings(&unchanged), vec!["1", "2"]);
        let back = descending.sorted(&[SortDescriptor::new("stringCol")]).unwrap();
        assert_eq!(strings(&back), vec!["1", "2"]);
        assert!(matches!(
            c.sorted(&[SortDescriptor::new("noSuchCol")]),
            Err(LiveDbError::InvalidProperty { .. })
        ));
        assert!(matches!(
            c.sorted_by("linkCol", true),
            Err(LiveDbError::InvalidProperty { .. })
        ));
    }
    let f = fixture(Variant::Unmanaged);
    assert!(is_capability(f.collection.sorted_by("stringCol", true)));
}

#[test]
fn test_enumeration() {
    for variant in ALL {
        let f = fixture(variant);
        let names: Vec<Value> = f
            .collection
            .iter()
            .unwrap()
            .map(|o| o.get("stringCol").unwrap())
            .collect();
        assert_eq!(names, vec![Value::from("1"), Value::from("2")], "{variant:?}");
        assert_eq!(f.collection.iter().unwrap().count(), 2, "restartable");
    }
}

#[test]
fn test_enumeration_with_deletion() {
    for variant in MANAGED {
        let f = fixture(variant);
        f.store
            .write(|s| {
                for object in f.collection.iter()? {
                    s.delete(&object)?;
                }
                Ok(())
            })
            .unwrap();
        assert_eq!(f.collection.count().unwrap(), 0, "{variant:?}");
    }
}

#[test]
fn test_iteration_skips_objects_deleted_mid_way() {
    let f = fixture(Variant::Table);
    f.store.begin_write().unwrap();
    let mut iter = f.collection.iter().unwrap();
    f.store.delete(&f.str2).unwrap();
    assert_eq!(iter.next(), Some(f.str1.clone()));
    assert_eq!(iter.next(), None);
    f.store.cancel_write().unwrap();
}

#[test]
fn test_description() {
    let plain = |kind: &str| {
        format!(
            "{kind}<StringObjectWithLink> (\n\
             \t[0] StringObjectWithLink {{\n\
             \t\tstringCol = 1;\n\
             \t\tlinkCol = (null);\n\
             \t}},\n\
             \t[1] StringObjectWithLink {{\n\
             \t\tstringCol = 2;\n\
             \t\tlinkCol = (null);\n\
             \t}}\n\
             )"
        )
    };
    for (variant, kind) in [
        (Variant::Table, "Results"),
        (Variant::TableView, "Results"),
        (Variant::ListView, "Results"),
        (Variant::List, "List"),
        (Variant::Unmanaged, "List"),
    ] {
        let f = fixture(variant);
        assert_eq!(f.collection.description().unwrap(), plain(kind), "{variant:?}");
        assert_eq!(f.collection.to_string(), plain(kind));
    }

    let f = fixture(Variant::Linking);
    assert_eq!(
        f.collection.description().unwrap(),
        "LinkingObjects<StringObjectWithLink> (\n\
         \t[0] StringObjectWithLink {\n\
         \t\tstringCol = 1;\n\
         \t\tlinkCol = LinkTarget {\n\
         \t\t\tid = 0;\n\
         \t\t};\n\
         \t},\n\
         \t[1] StringObjectWithLink {\n\
         \t\tstringCol = 2;\n\
         \t\tlinkCol = LinkTarget {\n\
         \t\t\tid = 0;\n\
         \t\t};\n\
         \t}\n\
         )"
    );
}

#[test]
fn test_description_lists_and_nesting_limit() {
    let config = StoreConfig::in_memory_yaml(SCHEMA).unwrap().with_max_nesting(1);
    let f = fixture_with(Variant::Linking, config);
    let text = f.collection.description().unwrap();
    assert!(text.contains("\t\tlinkCol = LinkTarget {...};\n"), "{text}");

    let holder = f.store.write(|s| s.create("StringList", &[])).unwrap();
    let lists = f.store.objects("StringList").unwrap();
    f.store.write(|_| holder.list("array")?.append(&f.str1)).unwrap();
    assert_eq!(
        lists.description().unwrap(),
        "Results<StringList> (\n\t[0] StringList {\n\t\tarray = List<StringObjectWithLink> (1);\n\t}\n)"
    );
    assert_eq!(
        Collection::unmanaged("StringList").description().unwrap(),
        "List<StringList> (\n)"
    );
}

fn aggregate_collections(store: &Store) -> Vec<Collection> {
    let list = store
        .write(|s| {
            let make = |i: i64, f: f32, d: f64, secs: i64| {
                s.create(
                    "AggregateObject",
                    &[
                        ("intCol", Value::Int(i)),
                        ("int8Col", Value::Int(i)),
                        ("int16Col", Value::Int(i)),
                        ("int32Col", Value::Int(i)),
                        ("int64Col", Value::Int(i)),
                        ("floatCol", Value::Float(f)),
                        ("doubleCol", Value::Double(d)),
                        ("dateCol", Value::Date(Utc.timestamp_opt(secs, 0).unwrap())),
                    ],
                )
            };
            let objects = [make(1, 1.1, 1.11, 1)?, make(2, 2.2, 2.22, 2)?, make(3, 2.2, 2.22, 2)?];
            let holder = s.create("AggregateObjectList", &[])?;
            let list = holder.list("list")?;
            for object in &objects {
                list.append(object)?;
            }
            Ok(list)
        })
        .unwrap();

    let table = store.objects("AggregateObject").unwrap();
    vec![
        table.clone(),
        table.filter(Predicate::eq("trueCol", true)).unwrap(),
        list.filter(Predicate::True).unwrap(),
        list,
    ]
}

const INT_COLUMNS: [&str; 5] = ["intCol", "int8Col", "int16Col", "int32Col", "int64Col"];

fn approx(value: Option<Value>, expected: f64) -> bool {
    value.and_then(|v| v.as_f64()).map(|v| (v - expected).abs() < 0.001) == Some(true)
}

#[test]
fn test_min_and_max() {
    let store = Store::in_memory(SCHEMA).unwrap();
    for c in aggregate_collections(&store) {
        for col in INT_COLUMNS {
            assert_eq!(c.min(col).unwrap(), Some(Value::Int(1)), "{col}");
            assert_eq!(c.max(col).unwrap(), Some(Value::Int(3)), "{col}");
        }
        assert_eq!(c.min("floatCol").unwrap(), Some(Value::Float(1.1)));
        assert_eq!(c.max("floatCol").unwrap(), Some(Value::Float(2.2)));
        assert_eq!(c.min("doubleCol").unwrap(), Some(Value::Double(1.11)));
        assert_eq!(c.max("doubleCol").unwrap(), Some(Value::Double(2.22)));
        assert_eq!(
            c.min("dateCol").unwrap(),
            Some(Value::Date(Utc.timestamp_opt(1, 0).unwrap()))
        );
        assert_eq!(
            c.max("dateCol").unwrap(),
            Some(Value::Date(Utc.timestamp_opt(2, 0).unwrap()))
        );
        assert!(matches!(c.min("noSuchCol"), Err(LiveDbError::InvalidProperty { .. })));
        assert!(matches!(c.max("boolCol"), Err(LiveDbError::InvalidProperty { .. })));
        assert!(matches!(c.max("linkCol"), Err(LiveDbError::InvalidProperty { .. })));
    }
}

#[test]
fn test_sum() {
    let store = Store::in_memory(SCHEMA).unwrap();
    for c in aggregate_collections(&store) {
        for col in INT_COLUMNS {
            assert_eq!(c.sum(col).unwrap(), Value::Int(6), "{col}");
        }
        assert!(approx(Some(c.sum("floatCol").unwrap()), 5.5));
        assert!(approx(Some(c.sum("doubleCol").unwrap()), 5.55));
        assert!(matches!(c.sum("doubleCol").unwrap(), Value::Double(_)));
        assert!(matches!(c.sum("noSuchCol"), Err(LiveDbError::InvalidProperty { .. })));
        assert!(matches!(c.sum("dateCol"), Err(LiveDbError::InvalidProperty { .. })));
        assert_eq!(
            c.value_for_key_path("@sum.intCol").unwrap(),
            KeyPathValue::Aggregate(Some(Value::Int(6)))
        );
    }
}

#[test]
fn test_average() {
    let store = Store::in_memory(SCHEMA).unwrap();
    for c in aggregate_collections(&store) {
        for col in INT_COLUMNS {
            assert_eq!(c.average(col).unwrap(), Some(Value::Double(2.0)), "{col}");
        }
        assert!(approx(c.average("floatCol").unwrap(), 1.8333));
        assert!(approx(c.average("doubleCol").unwrap(), 1.85));
        let expected = Utc.timestamp_opt(1, 666_667_000).unwrap();
        assert_eq!(c.average("dateCol").unwrap(), Some(Value::Date(expected)));
        assert!(matches!(c.average("noSuchCol"), Err(LiveDbError::InvalidProperty { .. })));
        assert_eq!(
            c.value_for_key_path("@avg.intCol").unwrap(),
            KeyPathValue::Aggregate(Some(Value::Double(2.0)))
        );
    }
}

#[test]
fn test_aggregates_on_empty_collection() {
    let store = Store::in_memory(SCHEMA).unwrap();
    for c in aggregate_collections(&store) {
        let empty = c.filter(Predicate::gt("intCol", 100)).unwrap();
        assert_eq!(empty.min("intCol").unwrap(), None);
        assert_eq!(empty.max("dateCol").unwrap(), None);
        assert_eq!(empty.average("doubleCol").unwrap(), None);
        assert_eq!(empty.sum("intCol").unwrap(), Value::Int(0));
        assert_eq!(empty.sum("floatCol").unwrap(), Value::Double(0.0));
    }
}

#[test]
fn test_integer_sum_overflow_is_reported_as_double() {
    let store = Store::in_memory(SCHEMA).unwrap();
    store
        .write(|s| {
            s.create("AggregateObject", &[("int64Col", Value::Int(i64::MAX))])?;
            s.create("AggregateObject", &[("int64Col", Value::Int(i64::MAX))])
        })
        .unwrap();
    let all = store.objects("AggregateObject").unwrap();
    assert_eq!(all.sum("int64Col").unwrap(), Value::Double(2.0 * i64::MAX as f64));
    assert_eq!(
        all.average("int64Col").unwrap(),
        Some(Value::Double(i64::MAX as f64))
    );
}

#[test]
fn test_unmanaged_capabilities() {
    let f = fixture(Variant::Unmanaged);
    let c = &f.collection;
    assert!(is_capability(c.min("stringCol")));
    assert!(is_capability(c.sum("stringCol")));
    assert!(is_capability(c.average("stringCol")));
    assert!(is_capability(c.observe()));
    assert!(is_capability(c.hand_off()));
    assert_eq!(
        c.capabilities(),
        Capabilities {
            filterable: false,
            sortable: false,
            aggregatable: false,
            mutable: true,
            observable: false,
            persisted_order: true,
        }
    );
}

#[test]
fn test_empty_unmanaged_list_checks_properties_when_schema_known() {
    let f = fixture(Variant::Table);
    let bare = Collection::unmanaged(CLASS);
    assert_eq!(bare.index_matching(&Predicate::eq("noSuchCol", 1)).unwrap(), None);

    let checked = Collection::unmanaged_in(f.store.schema(), CLASS).unwrap();
    assert!(matches!(
        checked.index_matching(&Predicate::eq("noSuchCol", 1)),
        Err(LiveDbError::InvalidProperty { .. })
    ));
    assert!(matches!(
        checked.value_for_key("noSuchCol"),
        Err(LiveDbError::InvalidProperty { .. })
    ));
    assert!(checked
        .value_for_key("stringCol")
        .unwrap()
        .into_values()
        .unwrap()
        .is_empty());
    assert!(matches!(
        Collection::unmanaged_in(f.store.schema(), "NoSuchClass"),
        Err(LiveDbError::Schema(_))
    ));
}

#[test]
fn test_unmanaged_mutation() {
    let f = fixture(Variant::Unmanaged);
    let c = &f.collection;
    c.insert(0, &f.str2).unwrap();
    assert_eq!(strings(c), vec!["2", "1", "2"]);
    assert!(matches!(
        c.insert(4, &f.str1),
        Err(LiveDbError::OutOfRange { index: 4, count: 3 })
    ));
    c.remove(0).unwrap();
    assert_eq!(strings(c), vec!["1", "2"]);
    c.clear().unwrap();
    assert!(c.is_empty().unwrap());
    let table = f.store.objects(CLASS).unwrap();
    c.replace_all(&table).unwrap();
    assert_eq!(c.count().unwrap(), 2);
}

#[test]
fn test_list_mutation() {
    let f = fixture(Variant::List);
    let list = &f.collection;
    assert!(matches!(list.append(&f.str1), Err(LiveDbError::WriteRequired(_))));
    f.store
        .write(|_| {
            list.append(&f.str1)?;
            list.insert(0, &f.str2)?;
            Ok(())
        })
        .unwrap();
    assert_eq!(strings(list), vec!["2", "1", "2", "1"]);
    f.store
        .write(|_| {
            list.remove(1)?;
            assert!(matches!(
                list.remove(9),
                Err(LiveDbError::OutOfRange { index: 9, count: 3 })
            ));
            Ok(())
        })
        .unwrap();
    assert_eq!(strings(list), vec!["2", "2", "1"]);

    let reversed = list.sorted_by("stringCol", true).unwrap();
    f.store.write(|_| list.replace_all(&reversed)).unwrap();
    assert_eq!(strings(list), vec!["1", "2", "2"]);
    f.store.write(|_| list.clear()).unwrap();
    assert_eq!(list.count().unwrap(), 0);
}

#[test]
fn test_list_rejects_other_class() {
    let f = fixture(Variant::List);
    let target = f
        .store
        .write(|s| s.create("LinkTarget", &[("id", Value::Int(5))]))
        .unwrap();
    let err = f.store.write(|_| f.collection.append(&target)).unwrap_err();
    assert!(matches!(err, LiveDbError::Validation(_)));
}

#[test]
fn test_read_only_variants_reject_mutation() {
    for variant in [Variant::Table, Variant::TableView, Variant::ListView, Variant::Linking] {
        let f = fixture(variant);
        f.store.begin_write().unwrap();
        assert!(is_capability(f.collection.append(&f.str1)), "{variant:?}");
        assert!(is_capability(f.collection.remove(0)));
        assert!(is_capability(f.collection.clear()));
        f.store.cancel_write().unwrap();
    }
}

#[test]
fn test_assign_list_property() {
    for variant in MANAGED {
        let f = fixture(variant);
        let copied = f
            .store
            .write(|s| {
                let array = s.create("StringList", &[])?;
                array.list("array")?.replace_all(&f.collection)?;
                Ok(array)
            })
            .unwrap();
        assert_eq!(strings(&copied.list("array").unwrap()), vec!["1", "2"], "{variant:?}");
    }
}

#[test]
fn test_invalidate() {
    for variant in MANAGED {
        let f = fixture(variant);
        f.store.invalidate().unwrap();
        assert!(f.collection.is_invalidated(), "{variant:?}");
        assert!(matches!(f.collection.count(), Err(LiveDbError::Invalidated(_))));
        assert!(matches!(f.collection.first(), Err(LiveDbError::Invalidated(_))));
        assert!(matches!(
            f.collection.filter(Predicate::True),
            Err(LiveDbError::Invalidated(_))
        ));
    }
    let f = fixture(Variant::Unmanaged);
    f.store.invalidate().unwrap();
    assert!(!f.collection.is_invalidated());
    assert_eq!(f.collection.count().unwrap(), 2);
}

#[test]
fn test_owner_deletion_invalidates_relationship_collections() {
    for variant in [Variant::List, Variant::ListView, Variant::Linking] {
        let f = fixture(variant);
        let holder = f.holder.clone().unwrap();
        f.store.write(|s| s.delete(&holder)).unwrap();
        assert!(matches!(f.collection.count(), Err(LiveDbError::Invalidated(_))), "{variant:?}");
        if variant != Variant::ListView {
            assert!(f.collection.is_invalidated());
        }
    }
}

#[test]
fn test_observe() {
    for variant in MANAGED {
        let f = fixture(variant);
        let token = f.collection.observe().unwrap();
        assert!(token.try_recv().unwrap().is_none());
        f.store.process_notifications().unwrap();
        match token.try_recv().unwrap() {
            Some(CollectionChange::Initial(collection)) => {
                assert_eq!(collection.count().unwrap(), 2, "{variant:?}")
            }
            other => panic!("expected initial, got {other:?}"),
        }

        add_element(&f, variant);
        f.store.process_notifications().unwrap();
        match token.try_recv().unwrap() {
            Some(CollectionChange::Update { collection, changes }) => {
                assert_eq!(collection.count().unwrap(), 3);
                assert_eq!(
                    changes,
                    ChangeSet {
                        deletions: vec![],
                        insertions: vec![2],
                        modifications: vec![],
                    },
                    "{variant:?}"
                );
            }
            other => panic!("expected update, got {other:?}"),
        }

        f.store.write(|_| f.str1.set("stringCol", "x")).unwrap();
        f.store.process_notifications().unwrap();
        match token.try_recv().unwrap() {
            Some(CollectionChange::Update { changes, .. }) => {
                assert_eq!(changes.modifications, vec![0], "{variant:?}")
            }
            other => panic!("expected update, got {other:?}"),
        }
        token.stop().unwrap();
    }
}

#[test]
fn test_observe_after_owner_deletion_fails() {
    for variant in [Variant::List, Variant::ListView, Variant::Linking] {
        let f = fixture(variant);
        let holder = f.holder.clone().unwrap();
        f.store.write(|s| s.delete(&holder)).unwrap();
        assert!(
            matches!(f.collection.observe(), Err(LiveDbError::Invalidated(_))),
            "{variant:?}"
        );
    }
}

#[test]
fn test_owner_deleted_before_initial_notification() {
    for variant in [Variant::List, Variant::ListView, Variant::Linking] {
        let f = fixture(variant);
        let token = f.collection.observe().unwrap();
        let holder = f.holder.clone().unwrap();
        f.store.write(|s| s.delete(&holder)).unwrap();

        f.store.process_notifications().unwrap();
        assert!(
            matches!(token.try_recv().unwrap(), Some(CollectionChange::Error(_))),
            "{variant:?}"
        );
        assert_eq!(token.state().unwrap(), SubscriptionState::Errored);
        assert!(token.try_recv().unwrap().is_none());
    }
}

#[test]
fn test_collection_used_on_another_thread() {
    for variant in MANAGED {
        let f = fixture(variant);
        let moved = f.collection.clone();
        let result = std::thread::spawn(move || moved.count())
            .join()
            .unwrap();
        assert!(matches!(result, Err(LiveDbError::WrongContext(_))), "{variant:?}");
        assert_eq!(f.collection.count().unwrap(), 2);
    }
}

#[test]
fn test_hand_off_across_threads() {
    for variant in MANAGED {
        let f = fixture(variant);
        let handoff = f.collection.hand_off().unwrap();
        let db = f.store.database().clone();
        let count = std::thread::spawn(move || {
            let store = db.open_store().unwrap();
            store.resolve_collection(&handoff).unwrap().count().unwrap()
        })
        .join()
        .unwrap();
        assert_eq!(count, 2, "{variant:?}");
    }
}

#[test]
fn test_aggregates_agree_with_projection() {
    let store = Store::in_memory(SCHEMA).unwrap();
    for c in aggregate_collections(&store) {
        let values = c.value_for_key("intCol").unwrap().into_values().unwrap();
        let folded: i64 = values.iter().filter_map(Value::as_i64).sum();
        assert_eq!(c.sum("intCol").unwrap(), Value::Int(folded));
        assert_eq!(
            c.value_for_key_path("@count").unwrap(),
            KeyPathValue::Count(c.count().unwrap())
        );

        let sorted = c.sorted_by("doubleCol", true).unwrap();
        let doubles = sorted.value_for_key("doubleCol").unwrap().into_values().unwrap();
        assert!(doubles.windows(2).all(|w| w[0].compare(&w[1]) != std::cmp::Ordering::Greater));
    }
}
