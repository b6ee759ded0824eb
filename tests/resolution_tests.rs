//! Integration tests for the promise resolution procedure: self-resolution,
//! adoption, and foreign thenables

mod common;
use common::{handler, outcome_of, run_loop, Outcome};
use pretty_assertions::assert_eq;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use thenable::{adapter, event_loop, messages, resolve_promise, Completion, ErrorKind, Promise, Value};

/// An object whose `then` runs `body` with `(this, resolvePromise, rejectPromise)`
fn make_thenable<F>(body: F) -> Value
where
    F: Fn(&Value, Value, Value) -> Completion + 'static,
{
    let object = Value::object();
    object.set(
        "then",
        Value::function("then", move |this, args| {
            let resolve = args.first().cloned().unwrap_or_default();
            let reject = args.get(1).cloned().unwrap_or_default();
            body(this, resolve, reject)
        }),
    );
    object
}

/// A promise derived from `Promise::resolve(1)` whose handler returns `x`
fn resolved_through_handler(x: Value) -> Promise {
    Promise::resolve(1).then(handler(move |_| Ok(x.clone())), Value::Undefined)
}

fn call1(f: &Value, arg: impl Into<Value>) {
    let _ = f.call(&Value::Undefined, &[arg.into()]);
}

fn assert_type_error(outcome: Outcome, message: &str) {
    match outcome {
        Outcome::Rejected(reason) => {
            assert_eq!(reason.error_kind(), Some(ErrorKind::TypeError));
            assert_eq!(reason.error_message().as_deref(), Some(message));
        }
        other => panic!("expected TypeError rejection, got {:?}", other),
    }
}

mod self_resolution {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_resolving_with_itself_is_type_error() {
        let d = adapter::deferred();
        d.resolve.call(d.promise.clone());
        assert_type_error(outcome_of(&d.promise), messages::SELF_RESOLUTION);
    }

    #[test]
    fn test_resolve_after_settlement_is_ignored() {
        let d = adapter::deferred();
        d.reject.call("first");
        resolve_promise(&d.promise, Value::Promise(d.promise.clone()));
        assert_eq!(outcome_of(&d.promise), Outcome::Rejected(Value::from("first")));
    }
}

mod adoption {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_adopts_fulfilled_promise() {
        let promise = resolved_through_handler(Value::Promise(Promise::resolve("adopted")));
        assert_eq!(outcome_of(&promise), Outcome::Fulfilled(Value::from("adopted")));
    }

    #[test]
    fn test_adopts_rejected_promise() {
        let promise = resolved_through_handler(Value::Promise(Promise::reject("adopted")));
        assert_eq!(outcome_of(&promise), Outcome::Rejected(Value::from("adopted")));
    }

    #[test]
    fn test_adopts_pending_promise_once_it_settles() {
        let inner = adapter::deferred();
        let outer = resolved_through_handler(Value::Promise(inner.promise.clone()));
        let outcome = common::observe(&outer);
        run_loop();
        assert_eq!(*outcome.borrow(), Outcome::Pending);

        inner.resolve.call("late");
        run_loop();
        assert_eq!(*outcome.borrow(), Outcome::Fulfilled(Value::from("late")));
    }

    #[test]
    fn test_adoption_forwards_settled_value() {
        let plain = Value::object();
        plain.set("answer", 42);
        let inner = Promise::resolve(plain.clone());
        let outer = resolved_through_handler(Value::Promise(inner));
        assert_eq!(outcome_of(&outer), Outcome::Fulfilled(plain));
    }

    #[test]
    fn test_second_resolve_after_pending_adoption_is_ignored() {
        let inner = adapter::deferred();
        let d = adapter::deferred();
        d.resolve.call(inner.promise.clone());
        d.resolve.call("too late");
        d.reject.call("also too late");
        inner.resolve.call("winner");
        assert_eq!(outcome_of(&d.promise), Outcome::Fulfilled(Value::from("winner")));
    }
}

mod thenables {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_synchronous_thenable_fulfills() {
        let x = make_thenable(|_, resolve, _| {
            call1(&resolve, "sync");
            Ok(Value::Undefined)
        });
        assert_eq!(outcome_of(&resolved_through_handler(x)), Outcome::Fulfilled(Value::from("sync")));
    }

    #[test]
    fn test_synchronous_thenable_rejects() {
        let x = make_thenable(|_, _, reject| {
            call1(&reject, "sync reason");
            Ok(Value::Undefined)
        });
        assert_eq!(
            outcome_of(&resolved_through_handler(x)),
            Outcome::Rejected(Value::from("sync reason"))
        );
    }

    #[test]
    fn test_asynchronous_thenable_fulfills() {
        let x = make_thenable(|_, resolve, _| {
            event_loop::current().set_timeout(move || call1(&resolve, "async"), 10);
            Ok(Value::Undefined)
        });
        assert_eq!(outcome_of(&resolved_through_handler(x)), Outcome::Fulfilled(Value::from("async")));
    }

    #[test]
    fn test_then_is_called_with_thenable_as_receiver() {
        let receiver = Rc::new(RefCell::new(Value::Undefined));
        let r = receiver.clone();
        let x = make_thenable(move |this, resolve, _| {
            *r.borrow_mut() = this.clone();
            call1(&resolve, 1);
            Ok(Value::Undefined)
        });
        outcome_of(&resolved_through_handler(x.clone()));
        assert_eq!(*receiver.borrow(), x);
    }

    #[test]
    fn test_then_read_exactly_once() {
        let reads = Rc::new(Cell::new(0));
        let r = reads.clone();
        let x = Value::object();
        x.define_getter(
            "then",
            Value::function("get then", move |_, _| {
                r.set(r.get() + 1);
                Ok(Value::function("then", |_, args| {
                    let resolve = args.first().cloned().unwrap_or_default();
                    call1(&resolve, "read once");
                    Ok(Value::Undefined)
                }))
            }),
        );
        let promise = resolved_through_handler(x);
        assert_eq!(outcome_of(&promise), Outcome::Fulfilled(Value::from("read once")));
        assert_eq!(reads.get(), 1);
    }

    #[test]
    fn test_throwing_then_getter_rejects() {
        let x = Value::object();
        x.define_getter("then", Value::function("get then", |_, _| Err(Value::from("getter threw"))));
        assert_eq!(
            outcome_of(&resolved_through_handler(x)),
            Outcome::Rejected(Value::from("getter threw"))
        );
    }

    #[test]
    fn test_then_throwing_before_callbacks_rejects() {
        let x = make_thenable(|_, _, _| Err(Value::from("then threw")));
        assert_eq!(
            outcome_of(&resolved_through_handler(x)),
            Outcome::Rejected(Value::from("then threw"))
        );
    }

    #[test]
    fn test_then_throwing_after_resolve_is_ignored() {
        let x = make_thenable(|_, resolve, _| {
            call1(&resolve, "kept");
            Err(Value::from("ignored"))
        });
        assert_eq!(outcome_of(&resolved_through_handler(x)), Outcome::Fulfilled(Value::from("kept")));
    }

    #[test]
    fn test_then_throwing_after_reject_is_ignored() {
        let x = make_thenable(|_, _, reject| {
            call1(&reject, "kept reason");
            Err(Value::from("ignored"))
        });
        assert_eq!(
            outcome_of(&resolved_through_handler(x)),
            Outcome::Rejected(Value::from("kept reason"))
        );
    }

    #[test]
    fn test_only_first_callback_counts() {
        let x = make_thenable(|_, resolve, reject| {
            call1(&resolve, "first");
            call1(&reject, "second");
            call1(&resolve, "third");
            Ok(Value::Undefined)
        });
        assert_eq!(outcome_of(&resolved_through_handler(x)), Outcome::Fulfilled(Value::from("first")));
    }

    #[test]
    fn test_reject_first_wins_over_later_resolve() {
        let x = make_thenable(|_, resolve, reject| {
            call1(&reject, "first");
            call1(&resolve, "second");
            Ok(Value::Undefined)
        });
        assert_eq!(outcome_of(&resolved_through_handler(x)), Outcome::Rejected(Value::from("first")));
    }

    #[test]
    fn test_non_callable_then_fulfills_with_object() {
        let x = Value::object();
        x.set("then", 5);
        assert_eq!(outcome_of(&resolved_through_handler(x.clone())), Outcome::Fulfilled(x));
    }

    #[test]
    fn test_object_without_then_fulfills_with_object() {
        let x = Value::array(vec![Value::from(1), Value::from(2)]);
        assert_eq!(outcome_of(&resolved_through_handler(x.clone())), Outcome::Fulfilled(x));
    }

    #[test]
    fn test_function_with_then_property_is_a_thenable() {
        let f = Value::function("f", |_, _| Ok(Value::Undefined));
        f.set(
            "then",
            Value::function("then", |_, args| {
                call1(&args.first().cloned().unwrap_or_default(), "from function");
                Ok(Value::Undefined)
            }),
        );
        assert_eq!(
            outcome_of(&resolved_through_handler(f)),
            Outcome::Fulfilled(Value::from("from function"))
        );
    }

    #[test]
    fn test_then_inherited_from_prototype() {
        let proto = make_thenable(|_, resolve, _| {
            call1(&resolve, "inherited");
            Ok(Value::Undefined)
        });
        let x = Value::object_with_prototype(&proto);
        assert_eq!(
            outcome_of(&resolved_through_handler(x)),
            Outcome::Fulfilled(Value::from("inherited"))
        );
    }

    #[test]
    fn test_nested_thenables_are_unwrapped() {
        let innermost = make_thenable(|_, resolve, _| {
            call1(&resolve, "deep");
            Ok(Value::Undefined)
        });
        let middle = make_thenable(move |_, resolve, _| {
            call1(&resolve, innermost.clone());
            Ok(Value::Undefined)
        });
        let outer = make_thenable(move |_, resolve, _| {
            call1(&resolve, middle.clone());
            Ok(Value::Undefined)
        });
        assert_eq!(outcome_of(&resolved_through_handler(outer)), Outcome::Fulfilled(Value::from("deep")));
    }

    #[test]
    fn test_thenable_resolving_to_rejected_promise() {
        let x = make_thenable(|_, resolve, _| {
            call1(&resolve, Promise::reject("inner rejection"));
            Ok(Value::Undefined)
        });
        assert_eq!(
            outcome_of(&resolved_through_handler(x)),
            Outcome::Rejected(Value::from("inner rejection"))
        );
    }

    #[test]
    fn test_rejection_reason_thenable_is_not_unwrapped() {
        let reason = make_thenable(|_, resolve, _| {
            call1(&resolve, "should not be used");
            Ok(Value::Undefined)
        });
        let inner = reason.clone();
        let x = make_thenable(move |_, _, reject| {
            call1(&reject, inner.clone());
            Ok(Value::Undefined)
        });
        assert_eq!(outcome_of(&resolved_through_handler(x)), Outcome::Rejected(reason));
    }

    #[test]
    fn test_thenable_resolving_with_itself_is_type_error() {
        let x = make_thenable(|this, resolve, _| {
            call1(&resolve, this.clone());
            Ok(Value::Undefined)
        });
        assert_type_error(outcome_of(&resolved_through_handler(x)), messages::THENABLE_CYCLE);
    }

    #[test]
    fn test_own_promise_then_is_callable_by_thenables() {
        let source = Promise::resolve("through then");
        let x = make_thenable(move |_, resolve, reject| {
            let then = Value::Promise(source.clone()).get("then")?;
            then.call(&Value::Promise(source.clone()), &[resolve, reject])
        });
        assert_eq!(
            outcome_of(&resolved_through_handler(x)),
            Outcome::Fulfilled(Value::from("through then"))
        );
    }
}
