//! In-memory driver for exercising dispatch without an engine.
//!
//! Keeps a sorted node map with the usual hierarchical semantics: order
//! walks sibling subscripts, delete kills subtrees, defined reports the
//! node/descendant state. Capability toggles mirror what a partially
//! resolved engine library would look like.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound::{Excluded, Unbounded};

use parking_lot::Mutex;

use crate::error::{canonical_text, status, DbError};
use crate::lock::ReentrantLock;
use crate::protocol::{Argument, Kind, ReplyBuffer, Sort};

use super::{split_function_reference, Driver};

#[derive(Default)]
struct State {
    globals: BTreeMap<Vec<Vec<u8>>, Vec<u8>>,
    objects: BTreeMap<u32, BTreeMap<Vec<u8>, Vec<u8>>>,
    next_oref: u32,
    namespace: String,
    calls: Vec<String>,
    shutdowns: u32,
}

pub struct StubSession {
    state: Mutex<State>,
    functions: bool,
    objects: bool,
    namespace: bool,
}

impl StubSession {
    pub fn new() -> Self {
        let state = State {
            namespace: "USER".to_string(),
            ..State::default()
        };
        StubSession {
            state: Mutex::new(state),
            functions: true,
            objects: true,
            namespace: true,
        }
    }

    pub fn without_functions(mut self) -> Self {
        self.functions = false;
        self
    }

    pub fn without_objects(mut self) -> Self {
        self.objects = false;
        self
    }

    pub fn without_namespace(mut self) -> Self {
        self.namespace = false;
        self
    }

    pub fn functions_enabled(&self) -> bool {
        self.functions
    }

    pub fn objects_enabled(&self) -> bool {
        self.objects
    }

    pub fn namespace_enabled(&self) -> bool {
        self.namespace
    }

    /// Operation names seen so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn shutdown_count(&self) -> u32 {
        self.state.lock().shutdowns
    }

    fn record(&self, call: impl Into<String>) {
        self.state.lock().calls.push(call.into());
    }

    fn order(&self, args: &[Argument<'_>], forward: bool) -> Vec<u8> {
        let mut parts = reference_parts(args);
        if parts.is_empty() {
            return Vec::new();
        }
        let seed = parts.pop().unwrap_or_default();
        let prefix = parts;

        let state = self.state.lock();
        let mut siblings: BTreeSet<Vec<u8>> = BTreeSet::new();
        for key in state.globals.keys() {
            if key.len() > prefix.len() && key[..prefix.len()] == prefix[..] {
                siblings.insert(key[prefix.len()].clone());
            }
        }

        let found = if forward {
            siblings
                .range::<Vec<u8>, _>((Excluded(&seed), Unbounded))
                .next()
        } else if seed.is_empty() {
            siblings.iter().next_back()
        } else {
            siblings
                .range::<Vec<u8>, _>((Unbounded, Excluded(&seed)))
                .next_back()
        };
        found.cloned().unwrap_or_default()
    }
}

impl Default for StubSession {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for StubSession {
    fn global_set(&self, args: &[Argument<'_>], reply: &mut ReplyBuffer) -> Result<(), DbError> {
        self.record("set");
        let mut parts = reference_parts(args);
        let value = if parts.len() >= 2 {
            parts.pop().unwrap_or_default()
        } else {
            Vec::new()
        };
        self.state.lock().globals.insert(parts, value);
        reply.set_value(Sort::Data, Kind::StrB, b"0");
        Ok(())
    }

    fn global_get(&self, args: &[Argument<'_>], reply: &mut ReplyBuffer) -> Result<(), DbError> {
        self.record("get");
        let parts = reference_parts(args);
        let state = self.state.lock();
        let value = state.globals.get(&parts).cloned().unwrap_or_default();
        reply.set_value(Sort::Data, Kind::StrB, &value);
        Ok(())
    }

    fn global_next(&self, args: &[Argument<'_>], reply: &mut ReplyBuffer) -> Result<(), DbError> {
        self.record("next");
        let found = self.order(args, true);
        reply.set_value(Sort::Data, Kind::StrB, &found);
        Ok(())
    }

    fn global_previous(
        &self,
        args: &[Argument<'_>],
        reply: &mut ReplyBuffer,
    ) -> Result<(), DbError> {
        self.record("previous");
        let found = self.order(args, false);
        reply.set_value(Sort::Data, Kind::StrB, &found);
        Ok(())
    }

    fn global_delete(&self, args: &[Argument<'_>], reply: &mut ReplyBuffer) -> Result<(), DbError> {
        self.record("delete");
        let parts = reference_parts(args);
        let mut state = self.state.lock();
        state
            .globals
            .retain(|key, _| !(key.len() >= parts.len() && key[..parts.len()] == parts[..]));
        reply.set_value(Sort::Data, Kind::StrB, b"0");
        Ok(())
    }

    fn global_defined(
        &self,
        args: &[Argument<'_>],
        reply: &mut ReplyBuffer,
    ) -> Result<(), DbError> {
        self.record("defined");
        let parts = reference_parts(args);
        let state = self.state.lock();
        let node = state.globals.contains_key(&parts);
        let descendants = state
            .globals
            .keys()
            .any(|key| key.len() > parts.len() && key[..parts.len()] == parts[..]);
        let value = match (node, descendants) {
            (true, true) => "11",
            (true, false) => "1",
            (false, true) => "10",
            (false, false) => "0",
        };
        reply.set_value(Sort::Data, Kind::StrB, value.as_bytes());
        Ok(())
    }

    fn global_increment(
        &self,
        args: &[Argument<'_>],
        reply: &mut ReplyBuffer,
    ) -> Result<(), DbError> {
        self.record("increment");
        let mut parts = reference_parts(args);
        let delta = if parts.len() >= 2 {
            parts.pop();
            args.last().map(numeric_value).unwrap_or(1.0)
        } else {
            1.0
        };
        let mut state = self.state.lock();
        let current = state
            .globals
            .get(&parts)
            .map(|value| ascii_number(value))
            .unwrap_or(0.0);
        let rendered = render_number(current + delta);
        state.globals.insert(parts, rendered.clone());
        reply.set_value(Sort::Data, Kind::StrB, &rendered);
        Ok(())
    }

    fn call_function(&self, args: &[Argument<'_>], reply: &mut ReplyBuffer) -> Result<(), DbError> {
        let reference = args.first().map(|arg| arg.bytes()).unwrap_or(b"");
        let (label, _routine) = split_function_reference(reference).ok_or_else(|| {
            DbError::preset(status::BAD_FUNCTION, canonical_text(status::BAD_FUNCTION))
        })?;
        self.record(format!("function {}", String::from_utf8_lossy(label)));
        let result = format!("{}:{}", String::from_utf8_lossy(label), args.len() - 1);
        reply.set_value(Sort::Data, Kind::StrB, result.as_bytes());
        Ok(())
    }

    fn class_method(&self, args: &[Argument<'_>], reply: &mut ReplyBuffer) -> Result<(), DbError> {
        let class = args.first().map(|arg| arg.to_text()).unwrap_or_default();
        self.record(format!("classmethod {}", class));
        let mut state = self.state.lock();
        state.next_oref += 1;
        let oref = state.next_oref;
        state.objects.insert(oref, BTreeMap::new());
        reply.set_value(Sort::Data, Kind::StrB, oref.to_string().as_bytes());
        Ok(())
    }

    fn instance_method(
        &self,
        args: &[Argument<'_>],
        reply: &mut ReplyBuffer,
    ) -> Result<(), DbError> {
        let method = args.get(1).map(|arg| arg.bytes()).unwrap_or(b"");
        self.record(format!("method {}", String::from_utf8_lossy(method)));
        reply.set_value(Sort::Data, Kind::StrB, method);
        Ok(())
    }

    fn get_property(&self, args: &[Argument<'_>], reply: &mut ReplyBuffer) -> Result<(), DbError> {
        self.record("getproperty");
        let oref = oref_of(args);
        let name = args.get(1).map(|arg| arg.bytes().to_vec()).unwrap_or_default();
        let state = self.state.lock();
        let value = state
            .objects
            .get(&oref)
            .and_then(|props| props.get(&name))
            .cloned()
            .unwrap_or_default();
        reply.set_value(Sort::Data, Kind::StrB, &value);
        Ok(())
    }

    fn set_property(&self, args: &[Argument<'_>], reply: &mut ReplyBuffer) -> Result<(), DbError> {
        self.record("setproperty");
        let oref = oref_of(args);
        let name = args.get(1).map(|arg| arg.bytes().to_vec()).unwrap_or_default();
        let value = args.get(2).map(|arg| arg.bytes().to_vec()).unwrap_or_default();
        let mut state = self.state.lock();
        if let Some(props) = state.objects.get_mut(&oref) {
            props.insert(name, value);
        }
        reply.set_value(Sort::Data, Kind::StrB, b"");
        Ok(())
    }

    fn close_instance(
        &self,
        args: &[Argument<'_>],
        reply: &mut ReplyBuffer,
    ) -> Result<(), DbError> {
        self.record("closeinstance");
        let oref = oref_of(args);
        self.state.lock().objects.remove(&oref);
        reply.set_value(Sort::Data, Kind::StrB, b"");
        Ok(())
    }

    fn get_namespace(&self, reply: &mut ReplyBuffer) -> Result<(), DbError> {
        self.record("getnamespace");
        let state = self.state.lock();
        reply.set_value(Sort::Data, Kind::StrB, state.namespace.as_bytes());
        Ok(())
    }

    fn set_namespace(
        &self,
        lock: &ReentrantLock,
        args: &[Argument<'_>],
        reply: &mut ReplyBuffer,
    ) -> Result<(), DbError> {
        let _held = lock.acquire();
        self.record(format!("setnamespace@depth{}", lock.depth()));
        let requested = args.first().map(|arg| arg.bytes()).unwrap_or(b"");
        if requested.is_empty() || requested.len() > 64 {
            return Err(DbError::Native(status::ER_NAMESPACE));
        }
        self.state.lock().namespace = String::from_utf8_lossy(requested).into_owned();
        reply.set_value(Sort::Data, Kind::StrB, requested);
        Ok(())
    }

    fn error_text(&self, code: i32) -> String {
        format!("stub: {}", canonical_text(code))
    }

    fn shutdown(&self) -> i32 {
        self.state.lock().shutdowns += 1;
        0
    }
}

fn reference_parts(args: &[Argument<'_>]) -> Vec<Vec<u8>> {
    args.iter().map(|arg| arg.bytes().to_vec()).collect()
}

fn oref_of(args: &[Argument<'_>]) -> u32 {
    args.first()
        .map(|arg| arg.to_text())
        .unwrap_or_default()
        .trim()
        .parse()
        .unwrap_or(0)
}

fn numeric_value(arg: &Argument<'_>) -> f64 {
    match arg {
        Argument::Int { value, .. } => *value as f64,
        Argument::Double { value, .. } => *value,
        Argument::Str(bytes) => ascii_number(bytes),
    }
}

fn ascii_number(bytes: &[u8]) -> f64 {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|text| text.trim().parse().ok())
        .unwrap_or(0.0)
}

fn render_number(value: f64) -> Vec<u8> {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        (value as i64).to_string().into_bytes()
    } else {
        value.to_string().into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::DEFAULT_REPLY_CAPACITY;

    fn reply() -> ReplyBuffer {
        ReplyBuffer::with_capacity(DEFAULT_REPLY_CAPACITY)
    }

    fn str_args<'a>(parts: &'a [&'a [u8]]) -> Vec<Argument<'a>> {
        parts.iter().map(|p| Argument::Str(p)).collect()
    }

    #[test]
    fn test_set_get_roundtrip() {
        let stub = StubSession::new();
        let mut out = reply();
        let args = str_args(&[b"^cities", b"uk", b"london", b"8.9M"]);
        stub.global_set(&args, &mut out).unwrap();
        assert_eq!(out.view().payload, b"0");

        let args = str_args(&[b"^cities", b"uk", b"london"]);
        stub.global_get(&args, &mut out).unwrap();
        assert_eq!(out.view().payload, b"8.9M");

        let args = str_args(&[b"^cities", b"uk", b"leeds"]);
        stub.global_get(&args, &mut out).unwrap();
        assert_eq!(out.view().payload, b"");
    }

    #[test]
    fn test_order_walks_siblings() {
        let stub = StubSession::new();
        let mut out = reply();
        for city in [&b"aberdeen"[..], b"glasgow", b"york"] {
            let parts: [&[u8]; 4] = [b"^cities", b"uk", city, b"x"];
            let args = str_args(&parts);
            stub.global_set(&args, &mut out).unwrap();
        }

        let args = str_args(&[b"^cities", b"uk", b""]);
        stub.global_next(&args, &mut out).unwrap();
        assert_eq!(out.view().payload, b"aberdeen");

        let args = str_args(&[b"^cities", b"uk", b"aberdeen"]);
        stub.global_next(&args, &mut out).unwrap();
        assert_eq!(out.view().payload, b"glasgow");

        let args = str_args(&[b"^cities", b"uk", b"york"]);
        stub.global_next(&args, &mut out).unwrap();
        assert_eq!(out.view().payload, b"");

        let args = str_args(&[b"^cities", b"uk", b""]);
        stub.global_previous(&args, &mut out).unwrap();
        assert_eq!(out.view().payload, b"york");

        let args = str_args(&[b"^cities", b"uk", b"glasgow"]);
        stub.global_previous(&args, &mut out).unwrap();
        assert_eq!(out.view().payload, b"aberdeen");
    }

    #[test]
    fn test_delete_kills_subtree() {
        let stub = StubSession::new();
        let mut out = reply();
        stub.global_set(&str_args(&[b"^t", b"a", b"1"]), &mut out).unwrap();
        stub.global_set(&str_args(&[b"^t", b"a", b"b", b"2"]), &mut out)
            .unwrap();
        stub.global_set(&str_args(&[b"^t", b"z", b"3"]), &mut out).unwrap();

        stub.global_delete(&str_args(&[b"^t", b"a"]), &mut out).unwrap();

        stub.global_get(&str_args(&[b"^t", b"a"]), &mut out).unwrap();
        assert_eq!(out.view().payload, b"");
        stub.global_get(&str_args(&[b"^t", b"a", b"b"]), &mut out).unwrap();
        assert_eq!(out.view().payload, b"");
        stub.global_get(&str_args(&[b"^t", b"z"]), &mut out).unwrap();
        assert_eq!(out.view().payload, b"3");
    }

    #[test]
    fn test_defined_states() {
        let stub = StubSession::new();
        let mut out = reply();
        stub.global_set(&str_args(&[b"^d", b"leaf", b"v"]), &mut out).unwrap();
        stub.global_set(&str_args(&[b"^d", b"both", b"v"]), &mut out).unwrap();
        stub.global_set(&str_args(&[b"^d", b"both", b"kid", b"v"]), &mut out)
            .unwrap();

        stub.global_defined(&str_args(&[b"^d", b"leaf"]), &mut out).unwrap();
        assert_eq!(out.view().payload, b"1");
        stub.global_defined(&str_args(&[b"^d", b"both"]), &mut out).unwrap();
        assert_eq!(out.view().payload, b"11");
        stub.global_defined(&str_args(&[b"^d"]), &mut out).unwrap();
        assert_eq!(out.view().payload, b"10");
        stub.global_defined(&str_args(&[b"^d", b"missing"]), &mut out).unwrap();
        assert_eq!(out.view().payload, b"0");
    }

    #[test]
    fn test_increment() {
        let stub = StubSession::new();
        let mut out = reply();
        let args = vec![
            Argument::Str(b"^seq"),
            Argument::Int {
                text: b"7",
                value: 7,
            },
        ];
        stub.global_increment(&args, &mut out).unwrap();
        assert_eq!(out.view().payload, b"7");
        stub.global_increment(&args, &mut out).unwrap();
        assert_eq!(out.view().payload, b"14");
    }

    #[test]
    fn test_function_splits_reference() {
        let stub = StubSession::new();
        let mut out = reply();
        let args = str_args(&[b"sum^math", b"2", b"3"]);
        stub.call_function(&args, &mut out).unwrap();
        assert_eq!(out.view().payload, b"sum:2");

        let args = str_args(&[b"nocaret"]);
        let err = stub.call_function(&args, &mut out).unwrap_err();
        assert_eq!(err.code(), status::BAD_FUNCTION);
    }

    #[test]
    fn test_object_lifecycle() {
        let stub = StubSession::new();
        let mut out = reply();
        stub.class_method(&str_args(&[b"User.Person", b"%New"]), &mut out)
            .unwrap();
        assert_eq!(out.view().payload, b"1");

        stub.set_property(&str_args(&[b"1", b"Name", b"Chigurh"]), &mut out)
            .unwrap();
        stub.get_property(&str_args(&[b"1", b"Name"]), &mut out).unwrap();
        assert_eq!(out.view().payload, b"Chigurh");

        stub.close_instance(&str_args(&[b"1"]), &mut out).unwrap();
        stub.get_property(&str_args(&[b"1", b"Name"]), &mut out).unwrap();
        assert_eq!(out.view().payload, b"");
    }

    #[test]
    fn test_namespace_roundtrip() {
        let stub = StubSession::new();
        let lock = ReentrantLock::new();
        let mut out = reply();
        stub.get_namespace(&mut out).unwrap();
        assert_eq!(out.view().payload, b"USER");

        stub.set_namespace(&lock, &str_args(&[b"%SYS"]), &mut out).unwrap();
        assert_eq!(out.view().payload, b"%SYS");
        stub.get_namespace(&mut out).unwrap();
        assert_eq!(out.view().payload, b"%SYS");

        let err = stub
            .set_namespace(&lock, &str_args(&[b""]), &mut out)
            .unwrap_err();
        assert_eq!(err.code(), status::ER_NAMESPACE);
    }

    #[test]
    fn test_capability_toggles() {
        let stub = StubSession::new().without_functions().without_objects();
        assert!(!stub.functions_enabled());
        assert!(!stub.objects_enabled());
        assert!(stub.namespace_enabled());
        let stub = StubSession::new().without_namespace();
        assert!(!stub.namespace_enabled());
    }

    #[test]
    fn test_call_recording() {
        let stub = StubSession::new();
        let mut out = reply();
        stub.global_set(&str_args(&[b"^a", b"1"]), &mut out).unwrap();
        stub.global_get(&str_args(&[b"^a"]), &mut out).unwrap();
        assert_eq!(stub.calls(), vec!["set".to_string(), "get".to_string()]);
        assert_eq!(stub.shutdown_count(), 0);
        stub.shutdown();
        assert_eq!(stub.shutdown_count(), 1);
    }
}
