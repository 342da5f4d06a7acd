//! End-to-end scenarios over nested containers: a form-like root holding a
//! scalar field, a keyed collection and a nested collection of rows.

use std::cell::RefCell;
use std::rc::Rc;

use fvars::prelude::*;
use fvars::{Chain, ChangeEvent, CollectionChangeEvent, TreeChangeEvent, TreeValidateEvent};

type Row = Variable<(u32, i32)>;
type Tag = (u8, String);

fn name_field() -> Rc<Variable<String>> {
    let config = VariableConfig::default().error_validator(|v: &String| -> Chain<String> {
        if v.trim().is_empty() {
            vec!["name is required".to_string()]
        } else {
            Vec::new()
        }
    });
    Variable::with_config(config, "ada".to_string(), "ada".to_string())
}

fn tags() -> Rc<CollectionVariable<u8, Tag>> {
    let config: CollectionConfig<u8, Tag> = CollectionConfig::new(|t: &Tag| t.0);
    CollectionVariable::new(config, [(1, "math".to_string()), (2, "logic".to_string())])
}

fn row(id: u32, amount: i32) -> Rc<Row> {
    let config = VariableConfig::default().warning_validator(|v: &(u32, i32)| -> Chain<String> {
        if v.1 < 0 {
            vec!["negative".to_string()]
        } else {
            Vec::new()
        }
    });
    Variable::with_config(config, (id, amount), (id, amount))
}

fn rows() -> Rc<CollectionVariableRoot<u32, Row>> {
    CollectionVariableRoot::new(
        CollectionRootConfig::new(|r: &Row| r.initial().0),
        [row(1, 10), row(2, 20)],
    )
}

struct Form {
    root: Rc<VariableRoot<&'static str>>,
    name: Rc<Variable<String>>,
    tags: Rc<CollectionVariable<u8, Tag>>,
    rows: Rc<CollectionVariableRoot<u32, Row>>,
}

fn form() -> Form {
    let root = VariableRoot::new();
    let name = root.register_node("name", name_field()).unwrap();
    let tags = root.register_node("tags", tags()).unwrap();
    let rows = root.register_node("rows", rows()).unwrap();
    Form {
        root,
        name,
        tags,
        rows,
    }
}

#[test]
fn fresh_form_is_clean() {
    let form = form();
    let state = form.root.state();
    assert!(!state.is_changed());
    assert!(!state.is_invalid());
    assert!(!state.is_dirty());
    assert_eq!(form.root.keys(), vec!["name", "tags", "rows"]);
}

#[test]
fn edits_roll_up_and_roll_back() {
    let form = form();
    form.name.change("grace".to_string());
    form.tags.add((3, "proof".to_string()));
    assert!(form.root.state().is_changed());
    assert_eq!(form.root.changed_keys().len(), 2);

    form.name.change("ada".to_string());
    form.tags.remove(3);
    assert!(!form.root.state().is_changed());
    assert!(form.root.changed_keys().is_empty());
    assert!(form.root.state().is_dirty());
}

#[test]
fn invalid_field_marks_form_invalid() {
    let form = form();
    form.name.change("  ".to_string());
    assert!(form.root.state().is_invalid());
    assert!(form.root.invalid_keys().contains(&"name"));
    assert_eq!(form.name.errors(), vec!["name is required".to_string()]);

    form.name.clear_validation();
    assert!(!form.root.state().is_invalid());
}

#[test]
fn nested_row_warning_reaches_the_top() {
    let form = form();
    let first = form.rows.get(&1).unwrap();
    first.change((1, -5));
    assert!(form.rows.warning_keys().contains(&1));
    assert!(form.root.state().is_warning());
    assert!(form.root.warning_keys().contains(&"rows"));
    assert!(!form.root.state().is_invalid());
}

#[test]
fn bubbled_events_carry_the_child_event_and_link_validation() {
    let form = form();
    let changes: Rc<RefCell<Vec<Rc<TreeChangeEvent<&'static str>>>>> =
        Rc::new(RefCell::new(Vec::new()));
    let validations: Rc<RefCell<Vec<Rc<TreeValidateEvent<&'static str>>>>> =
        Rc::new(RefCell::new(Vec::new()));
    let _c = {
        let changes = Rc::clone(&changes);
        form.root
            .on_change()
            .subscribe(move |e| changes.borrow_mut().push(Rc::clone(e)))
    };
    let _v = {
        let validations = Rc::clone(&validations);
        form.root
            .on_validate()
            .subscribe(move |e| validations.borrow_mut().push(Rc::clone(e)))
    };

    form.tags.add((9, "sets".to_string()));

    let changes = changes.borrow();
    let validations = validations.borrow();
    assert_eq!(changes.len(), 1);
    assert_eq!(validations.len(), 1);

    let change = &changes[0];
    assert_eq!(change.source, ChangeSource::ChildNode);
    assert_eq!(change.child_key, Some("tags"));
    assert!(change.is_structural_noop());
    let inner = change.child_event.as_ref().unwrap();
    let inner = inner
        .as_any()
        .downcast_ref::<CollectionChangeEvent<u8, Tag, String>>()
        .unwrap();
    assert_eq!(inner.source, ChangeSource::Change);

    let linked = validations[0].change.as_ref().unwrap();
    assert!(Rc::ptr_eq(linked, change));
    assert_eq!(validations[0].child_key, Some("tags"));
}

#[test]
fn nested_row_event_is_wrapped_twice() {
    let form = form();
    let seen: Rc<RefCell<Vec<Rc<TreeChangeEvent<&'static str>>>>> =
        Rc::new(RefCell::new(Vec::new()));
    let _sub = {
        let seen = Rc::clone(&seen);
        form.root
            .on_change()
            .subscribe(move |e| seen.borrow_mut().push(Rc::clone(e)))
    };

    form.rows.get(&2).unwrap().change((2, 21));

    let seen = seen.borrow();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].child_key, Some("rows"));
    let middle = seen[0].child_event.as_ref().unwrap();
    let middle = middle
        .as_any()
        .downcast_ref::<TreeChangeEvent<u32>>()
        .unwrap();
    assert_eq!(middle.child_key, Some(2));
    assert_eq!(middle.source, ChangeSource::ChildNode);
}

#[test]
fn removed_row_stops_bubbling_until_restored() {
    let form = form();
    let second = form.rows.get(&2).unwrap();
    assert_eq!(form.rows.remove(2), ChangeResult::Changed);
    assert!(form.rows.is_removed(&2));
    assert!(form.root.changed_keys().contains(&"rows"));

    let count = Rc::new(RefCell::new(0usize));
    let _sub = {
        let count = Rc::clone(&count);
        form.root
            .on_change()
            .subscribe(move |_| *count.borrow_mut() += 1)
    };
    second.change((2, -1));
    assert_eq!(*count.borrow(), 0);
    assert!(!form.rows.warning_keys().contains(&2));

    assert_eq!(form.rows.restore(2), ChangeResult::Changed);
    assert_eq!(*count.borrow(), 1);
    assert!(form.rows.warning_keys().contains(&2));
    assert!(form.root.state().is_warning());
}

#[test]
fn row_swapped_in_for_added_key_disposes_the_old_one() {
    let form = form();
    let extra = row(3, 30);
    form.rows.add(Rc::clone(&extra));
    assert!(form.rows.added_keys().contains(&3));

    let replacement = row(3, 33);
    let result = form.rows.change(
        TreeChanges::new()
            .restore(1)
            .restore(2)
            .add(Rc::clone(&replacement)),
    );
    assert_eq!(result, ChangeResult::Changed);
    assert!(extra.state().is_disposed());
    assert!(Rc::ptr_eq(&form.rows.get(&3).unwrap(), &replacement));
    assert!(replacement.parent().is_some());
}

#[test]
fn read_only_form_refuses_edits_everywhere() {
    let form = form();
    form.root.set_read_only(true);
    assert!(form.root.state().is_read_only());
    assert_eq!(form.name.change("x".to_string()), ChangeResult::ReadOnly);
    assert_eq!(form.tags.add((7, "x".to_string())), ChangeResult::ReadOnly);
    assert_eq!(form.rows.remove(1), ChangeResult::ReadOnly);

    form.root.set_read_only(false);
    assert_eq!(form.name.change("x".to_string()), ChangeResult::Changed);
}

#[test]
fn disposing_the_form_disposes_every_node() {
    let form = form();
    let first = form.rows.get(&1).unwrap();
    form.root.dispose();
    assert!(form.root.state().is_disposed());
    assert!(form.name.state().is_disposed());
    assert!(form.tags.state().is_disposed());
    assert!(form.rows.state().is_disposed());
    assert!(first.state().is_disposed());
    assert_eq!(form.name.change("late".to_string()), ChangeResult::ReadOnly);
}

#[test]
fn child_disposed_on_its_own_leaves_the_form() {
    let form = form();
    let detached: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));
    let _sub = {
        let detached = Rc::clone(&detached);
        form.root
            .on_change()
            .subscribe(move |e| detached.borrow_mut().extend(e.detached.iter().copied()))
    };
    form.tags.dispose();
    assert_eq!(*detached.borrow(), vec!["tags"]);
    assert!(!form.root.contains_key(&"tags"));
    assert_eq!(form.root.len(), 2);
}
