//! End-to-end scenarios over leaf containers: a cart of keyed order lines
//! and a scalar field.

use std::cell::RefCell;
use std::rc::Rc;

use fvars::prelude::*;
use fvars::{Chain, CollectionChangeEvent, CollectionValidateEvent, ElementMap, VariableChangeEvent};

#[derive(Debug, Clone, PartialEq)]
struct Line {
    sku: u16,
    qty: u32,
    note: &'static str,
}

fn line(sku: u16, qty: u32) -> Line {
    Line { sku, qty, note: "" }
}

type Cart = CollectionVariable<u16, Line, String>;
type CartChange = Rc<CollectionChangeEvent<u16, Line, String>>;
type CartValidate = Rc<CollectionValidateEvent<u16, Line, String>>;

const LOCKED: u16 = 99;

fn cart(initial: Vec<Line>) -> Rc<Cart> {
    let config = CollectionConfig::with_comparer(
        |l: &Line| l.sku,
        Comparer::new(|a: &Line, b: &Line| a.qty == b.qty),
    )
    .error_validator(|lines: &ElementMap<u16, Line>| -> Chain<String> {
        let total: u32 = lines.values().map(|l| l.qty).sum();
        if total > 10 {
            vec![format!("too many items: {total}")]
        } else {
            Vec::new()
        }
    })
    .element_warning_validator(|l: &Line| -> Chain<String> {
        if l.qty == 0 {
            vec!["empty line".to_string()]
        } else {
            Vec::new()
        }
    })
    .continue_removal(|sku: &u16, _l: &Line| *sku != LOCKED)
    .modify_change_input(|lines: Vec<Line>| lines.into_iter().filter(|l| l.qty > 0).collect());
    CollectionVariable::new(config, initial)
}

type Recorded<E> = Rc<RefCell<Vec<E>>>;

fn record(
    cart: &Cart,
) -> (
    Recorded<CartChange>,
    Recorded<CartValidate>,
    Subscription,
    Subscription,
) {
    let changes = Rc::new(RefCell::new(Vec::new()));
    let validations = Rc::new(RefCell::new(Vec::new()));
    let c = {
        let changes = Rc::clone(&changes);
        cart.on_change()
            .subscribe(move |e: &CartChange| changes.borrow_mut().push(Rc::clone(e)))
    };
    let v = {
        let validations = Rc::clone(&validations);
        cart.on_validate()
            .subscribe(move |e: &CartValidate| validations.borrow_mut().push(Rc::clone(e)))
    };
    (changes, validations, c, v)
}

#[test]
fn container_validator_sees_the_whole_collection() {
    let cart = cart(vec![line(1, 4), line(2, 4)]);
    assert!(!cart.state().is_invalid());

    cart.add(line(3, 5));
    assert!(cart.state().is_invalid());
    assert_eq!(cart.errors(), vec!["too many items: 13".to_string()]);
    assert!(cart.invalid_keys().is_empty());

    cart.remove(3);
    assert!(!cart.state().is_invalid());
    assert!(cart.errors().is_empty());
}

#[test]
fn element_warning_is_per_key() {
    let cart = cart(vec![line(1, 1)]);
    cart.add(line(2, 0));
    assert!(cart.state().is_warning());
    assert!(cart.warning_keys().contains(&2));
    assert_eq!(cart.get_warnings(&2), vec!["empty line".to_string()]);
    assert!(cart.get_warnings(&1).is_empty());
    assert!(cart.get_state(&2).contains(ElementState::ADDED | ElementState::WARNING));
}

#[test]
fn comparer_decides_what_counts_as_a_change() {
    let cart = cart(vec![line(1, 2)]);
    let renoted = Line {
        note: "gift",
        ..line(1, 2)
    };
    assert_eq!(cart.try_replace(renoted.clone()), ChangeResult::NotChanged);
    assert!(!cart.state().is_changed());

    cart.replace(renoted);
    assert!(cart.get_state(&1).is_empty());
    assert!(!cart.state().is_changed());

    cart.replace(line(1, 3));
    assert_eq!(cart.get_state(&1), ElementState::CHANGED);
    assert!(cart.state().is_changed());
}

#[test]
fn change_input_transform_drops_empty_lines() {
    let cart = cart(vec![line(1, 1), line(2, 2)]);
    let result = cart.change(vec![line(1, 1), line(2, 0), line(3, 3)]);
    assert_eq!(result, ChangeResult::Changed);
    assert!(!cart.contains_key(&2));
    assert!(cart.contains_key(&3));
    assert_eq!(cart.get_state(&2), ElementState::REMOVED);
    assert_eq!(cart.get_state(&3), ElementState::ADDED);
}

#[test]
fn removal_veto_keeps_locked_line() {
    let cart = cart(vec![line(LOCKED, 1), line(1, 1)]);
    assert_eq!(cart.remove(LOCKED), ChangeResult::NotChanged);
    assert!(cart.contains_key(&LOCKED));

    cart.change(Vec::new());
    assert!(cart.contains_key(&LOCKED));
    assert!(!cart.contains_key(&1));
}

#[test]
fn validation_event_follows_and_links_its_change() {
    let cart = cart(vec![line(1, 4)]);
    let (changes, validations, _c, _v) = record(&cart);

    cart.add(line(2, 9));

    let changes = changes.borrow();
    let validations = validations.borrow();
    assert_eq!(changes.len(), 1);
    assert_eq!(validations.len(), 1);
    assert_eq!(changes[0].added.len(), 1);
    assert_eq!(changes[0].added[0].key, 2);
    assert_eq!(changes[0].added[0].previous.state, ElementState::NOT_FOUND);
    assert_eq!(changes[0].added[0].current.element, Some(line(2, 9)));

    let validate = &validations[0];
    assert!(Rc::ptr_eq(validate.change.as_ref().unwrap(), &changes[0]));
    assert!(validate.previous_errors.is_empty());
    assert!(!validate.previous_state.is_invalid());
}

#[test]
fn reset_with_diverging_current_reports_modified_keys() {
    let cart = cart(vec![line(1, 1)]);
    let result = cart.reset_with(vec![line(1, 1), line(2, 2)], vec![line(2, 5), line(3, 1)]);
    assert_eq!(result, ChangeResult::Changed);

    let modified = cart.modified_keys();
    assert!(modified.contains(&1));
    assert!(modified.contains(&2));
    assert!(modified.contains(&3));
    assert_eq!(cart.get_state(&1), ElementState::REMOVED);
    assert_eq!(cart.get_state(&2), ElementState::CHANGED);
    assert_eq!(cart.get_state(&3), ElementState::ADDED);
    assert_eq!(cart.initial_elements().len(), 2);
}

#[test]
fn read_only_cart_still_refreshes() {
    let cart = cart(vec![line(1, 1)]);
    cart.set_read_only(true);
    assert_eq!(cart.add(line(2, 1)), ChangeResult::ReadOnly);

    let (_changes, validations, _c, _v) = record(&cart);
    cart.refresh();
    assert_eq!(validations.borrow().len(), 1);
}

#[test]
fn scalar_round_trip_to_baseline() {
    let var: Rc<Variable<u32>> = Variable::new(5);
    var.change(6);
    assert!(var.state().is_changed());
    var.change(5);
    assert!(!var.state().is_changed());

    var.change(7);
    assert_eq!(var.reset_to(7), ChangeResult::Changed);
    assert!(!var.state().is_changed());
    assert_eq!(var.initial(), 7);
}

#[test]
fn scalar_read_only_flip_publishes_once() {
    let var: Rc<Variable<u32>> = Variable::new(1);
    let seen: Rc<RefCell<Vec<ChangeSource>>> = Rc::new(RefCell::new(Vec::new()));
    let _sub = {
        let seen = Rc::clone(&seen);
        var.on_change()
            .subscribe(move |e: &Rc<VariableChangeEvent<u32>>| seen.borrow_mut().push(e.source))
    };
    var.set_read_only(true);
    var.set_read_only(true);
    assert_eq!(var.change(2), ChangeResult::ReadOnly);
    var.set_read_only(false);
    assert_eq!(var.change(2), ChangeResult::Changed);
    assert_eq!(
        *seen.borrow(),
        vec![
            ChangeSource::SetReadOnly,
            ChangeSource::SetReadOnly,
            ChangeSource::Change
        ]
    );
}
