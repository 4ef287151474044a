//! Engine-B driver: the buffer-vector simple API.
//!
//! YottaDB takes whole references per call: a variable-name descriptor
//! plus a vector of subscript descriptors, each a counted view straight
//! into the decoded request. Results come back through a caller-owned
//! buffer, which here is the reply's payload region itself, so a read
//! lands in place with no extra copy.
//!
//! The library stays resident for the life of the process. The engine
//! runtime cannot reinitialize after a detach, so the handle is never
//! dropped, only the session around it.

use std::mem::ManuallyDrop;
use std::os::raw::c_int;

use crate::error::{canonical_text, status, DbError};
use crate::ffi::ydb_api::{self, YdbApi};
use crate::ffi::{EngineLibrary, YdbBuffer};
use crate::lock::ReentrantLock;
use crate::protocol::{Argument, Kind, ReplyBuffer, Sort, BLOCK_HEADER_SIZE};
use crate::registry::EngineVersion;
use crate::trace::Trace;

use super::{leading_f64, leading_i32, split_function_reference, Driver, EngineKind, OpenProfile};

/// Cap for intrinsic variable reads, `$zv` and `$zstatus`.
const INTRINSIC_MAX: usize = 255;

pub struct YdbSession {
    lib: ManuallyDrop<EngineLibrary>,
    api: YdbApi,
    trace: Trace,
}

impl YdbSession {
    /// Load the engine library under the profile's installation path and
    /// attach to the database.
    pub fn open(
        profile: &OpenProfile,
        trace: &Trace,
    ) -> Result<(YdbSession, Option<EngineVersion>), DbError> {
        let libdir = library_directory(&profile.path);
        let candidates = candidate_paths(&libdir);
        let lib = EngineLibrary::open_first(EngineKind::YottaDb.product(), &candidates)?;
        trace.log(&format!("loaded {}", lib.path()));

        let api = YdbApi::resolve(&lib)?;
        let session = YdbSession {
            lib: ManuallyDrop::new(lib),
            api,
            trace: trace.clone(),
        };

        // The runtime attaches lazily on first access; the init code
        // only matters when the version read below fails too.
        let rc = (session.api.init)();
        session.trace.log(&format!("{}==ydb_init()", rc));

        let mut scratch = [0u8; INTRINSIC_MAX + 1];
        let version = match session.fetch_intrinsic(b"$zv", &mut scratch) {
            Ok(bytes) => {
                let text = String::from_utf8_lossy(bytes).into_owned();
                session.trace.log(&format!("$zv={}", text));
                Some(parse_ydb_zv(&text))
            }
            Err(rc) => {
                let text = session.error_text(rc);
                return Err(DbError::preset(rc, text));
            }
        };
        Ok((session, version))
    }

    pub fn library(&self) -> &EngineLibrary {
        &self.lib
    }

    /// Read an intrinsic special variable into `scratch`, returning the
    /// bytes the engine wrote.
    fn fetch_intrinsic<'a>(
        &self,
        name: &[u8],
        scratch: &'a mut [u8; INTRINSIC_MAX + 1],
    ) -> Result<&'a [u8], i32> {
        let varname = YdbBuffer::from_bytes(name);
        let mut data = YdbBuffer::writable(&mut scratch[..INTRINSIC_MAX]);
        let rc = (self.api.get)(&varname, 0, std::ptr::null(), &mut data);
        self.trace.log(&format!(
            "{}==ydb_get_s({})",
            rc,
            String::from_utf8_lossy(name)
        ));
        if rc != status::OK {
            return Err(rc);
        }
        let used = (data.len_used as usize).min(INTRINSIC_MAX);
        Ok(&scratch[..used])
    }

    /// The engine's rolling status line, empty when unreadable.
    fn status_text(&self) -> String {
        let mut scratch = [0u8; INTRINSIC_MAX + 1];
        match self.fetch_intrinsic(b"$zstatus", &mut scratch) {
            Ok(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            Err(_) => String::new(),
        }
    }

    /// Hand the engine the reply's payload region to write into, then
    /// trim the reply to what it reported back.
    fn read_into_reply(
        &self,
        reply: &mut ReplyBuffer,
        call: impl FnOnce(&mut YdbBuffer) -> c_int,
    ) -> c_int {
        let region_len = reply
            .declared_capacity()
            .saturating_sub(BLOCK_HEADER_SIZE)
            .max(1);
        let mut data = YdbBuffer::writable(reply.fill_region(region_len));
        let rc = call(&mut data);
        reply.commit_fill(data.len_used as usize);
        reply.finish(Sort::Data, Kind::StrB);
        rc
    }
}

impl Driver for YdbSession {
    fn global_set(&self, args: &[Argument<'_>], reply: &mut ReplyBuffer) -> Result<(), DbError> {
        let name = name_view(args);
        let subs = subscript_views(args, true);
        let value = YdbBuffer::from_bytes(value_bytes(args));
        let rc = (self.api.set)(&name, subs.len() as c_int, vector_ptr(&subs), &value);
        self.trace
            .log(&format!("{}==ydb_set_s({})", rc, subs.len()));
        if rc != status::OK {
            return Err(DbError::Native(rc));
        }
        reply.set_value(Sort::Data, Kind::StrB, b"0");
        Ok(())
    }

    fn global_get(&self, args: &[Argument<'_>], reply: &mut ReplyBuffer) -> Result<(), DbError> {
        let name = name_view(args);
        let subs = subscript_views(args, false);
        let rc = self.read_into_reply(reply, |data| {
            (self.api.get)(&name, subs.len() as c_int, vector_ptr(&subs), data)
        });
        self.trace
            .log(&format!("{}==ydb_get_s({})", rc, subs.len()));
        if rc == status::YDB_GVUNDEF {
            reply.set_value(Sort::Data, Kind::StrB, b"");
            return Ok(());
        }
        if rc != status::OK {
            return Err(DbError::Native(rc));
        }
        Ok(())
    }

    fn global_next(&self, args: &[Argument<'_>], reply: &mut ReplyBuffer) -> Result<(), DbError> {
        let name = name_view(args);
        let subs = subscript_views(args, false);
        let rc = self.read_into_reply(reply, |data| {
            (self.api.subscript_next)(&name, subs.len() as c_int, vector_ptr(&subs), data)
        });
        self.trace
            .log(&format!("{}==ydb_subscript_next_s({})", rc, subs.len()));
        if rc != status::OK {
            return Err(DbError::Native(rc));
        }
        Ok(())
    }

    fn global_previous(
        &self,
        args: &[Argument<'_>],
        reply: &mut ReplyBuffer,
    ) -> Result<(), DbError> {
        let name = name_view(args);
        let subs = subscript_views(args, false);
        let rc = self.read_into_reply(reply, |data| {
            (self.api.subscript_previous)(&name, subs.len() as c_int, vector_ptr(&subs), data)
        });
        self.trace.log(&format!(
            "{}==ydb_subscript_previous_s({})",
            rc,
            subs.len()
        ));
        if rc != status::OK {
            return Err(DbError::Native(rc));
        }
        Ok(())
    }

    fn global_delete(&self, args: &[Argument<'_>], reply: &mut ReplyBuffer) -> Result<(), DbError> {
        let name = name_view(args);
        let subs = subscript_views(args, false);
        let rc = (self.api.delete)(
            &name,
            subs.len() as c_int,
            vector_ptr(&subs),
            ydb_api::DEL_TREE,
        );
        self.trace
            .log(&format!("{}==ydb_delete_s({})", rc, subs.len()));
        if rc != status::OK {
            return Err(DbError::Native(rc));
        }
        reply.set_value(Sort::Data, Kind::StrB, b"0");
        Ok(())
    }

    fn global_defined(
        &self,
        args: &[Argument<'_>],
        reply: &mut ReplyBuffer,
    ) -> Result<(), DbError> {
        let name = name_view(args);
        let subs = subscript_views(args, false);
        let mut state: u32 = 0;
        let rc = (self.api.data)(&name, subs.len() as c_int, vector_ptr(&subs), &mut state);
        self.trace
            .log(&format!("{}==ydb_data_s({})", rc, subs.len()));
        if rc != status::OK {
            return Err(DbError::Native(rc));
        }
        reply.set_value(Sort::Data, Kind::StrB, state.to_string().as_bytes());
        Ok(())
    }

    fn global_increment(
        &self,
        args: &[Argument<'_>],
        reply: &mut ReplyBuffer,
    ) -> Result<(), DbError> {
        let name = name_view(args);
        let subs = subscript_views(args, true);
        let delta = YdbBuffer::from_bytes(value_bytes(args));
        let rc = self.read_into_reply(reply, |data| {
            (self.api.incr)(&name, subs.len() as c_int, vector_ptr(&subs), &delta, data)
        });
        self.trace
            .log(&format!("{}==ydb_incr_s({})", rc, subs.len()));
        if rc != status::OK {
            return Err(DbError::Native(rc));
        }
        Ok(())
    }

    fn call_function(&self, args: &[Argument<'_>], reply: &mut ReplyBuffer) -> Result<(), DbError> {
        let reference = args.first().map(|arg| arg.bytes()).unwrap_or(b"");
        let (label, _routine) = split_function_reference(reference).ok_or_else(|| {
            DbError::preset(status::BAD_FUNCTION, canonical_text(status::BAD_FUNCTION))
        })?;

        // The call-in bridge wants C strings; wire payloads are counted,
        // so each one gets a terminated copy.
        let label = c_bytes(label);
        let inputs: Vec<Vec<u8>> = args
            .get(1..)
            .unwrap_or(&[])
            .iter()
            .map(|arg| c_bytes(arg.bytes()))
            .collect();

        let region_len = reply
            .declared_capacity()
            .saturating_sub(BLOCK_HEADER_SIZE)
            .max(1);
        let region = reply.fill_region(region_len);
        let out = region.as_mut_ptr().cast::<std::os::raw::c_char>();
        // Safety: label and inputs are NUL-terminated, and out points at
        // region_len writable bytes. Calls beyond three inputs never
        // reach the bridge.
        let rc = unsafe {
            match inputs.len() {
                0 => (self.api.ci)(label.as_ptr().cast(), out),
                1 => (self.api.ci)(label.as_ptr().cast(), out, inputs[0].as_ptr().cast::<std::os::raw::c_char>()),
                2 => (self.api.ci)(
                    label.as_ptr().cast(),
                    out,
                    inputs[0].as_ptr().cast::<std::os::raw::c_char>(),
                    inputs[1].as_ptr().cast::<std::os::raw::c_char>(),
                ),
                3 => (self.api.ci)(
                    label.as_ptr().cast(),
                    out,
                    inputs[0].as_ptr().cast::<std::os::raw::c_char>(),
                    inputs[1].as_ptr().cast::<std::os::raw::c_char>(),
                    inputs[2].as_ptr().cast::<std::os::raw::c_char>(),
                ),
                _ => status::OK,
            }
        };
        self.trace.log(&format!(
            "{}==ydb_ci({})",
            rc,
            String::from_utf8_lossy(&label[..label.len() - 1])
        ));
        if rc != status::OK {
            return Err(DbError::Native(rc));
        }

        // The bridge reports length by termination only.
        let used = region.iter().position(|&b| b == 0).unwrap_or(region.len());
        reply.commit_fill(used);
        reply.finish(Sort::Data, Kind::StrB);
        Ok(())
    }

    fn class_method(&self, _args: &[Argument<'_>], _reply: &mut ReplyBuffer) -> Result<(), DbError> {
        Err(super::objects_refusal())
    }

    fn instance_method(
        &self,
        _args: &[Argument<'_>],
        _reply: &mut ReplyBuffer,
    ) -> Result<(), DbError> {
        Err(super::objects_refusal())
    }

    fn get_property(&self, _args: &[Argument<'_>], _reply: &mut ReplyBuffer) -> Result<(), DbError> {
        Err(super::objects_refusal())
    }

    fn set_property(&self, _args: &[Argument<'_>], _reply: &mut ReplyBuffer) -> Result<(), DbError> {
        Err(super::objects_refusal())
    }

    fn close_instance(
        &self,
        _args: &[Argument<'_>],
        _reply: &mut ReplyBuffer,
    ) -> Result<(), DbError> {
        Err(super::objects_refusal())
    }

    fn get_namespace(&self, _reply: &mut ReplyBuffer) -> Result<(), DbError> {
        Err(super::namespace_refusal(super::CODE_UNAVAILABLE))
    }

    fn set_namespace(
        &self,
        _lock: &ReentrantLock,
        _args: &[Argument<'_>],
        _reply: &mut ReplyBuffer,
    ) -> Result<(), DbError> {
        Err(super::namespace_refusal(super::CODE_UNAVAILABLE))
    }

    fn error_text(&self, code: i32) -> String {
        let text = self.status_text();
        if text.is_empty() {
            canonical_text(code).to_string()
        } else {
            text
        }
    }

    fn shutdown(&self) -> i32 {
        let rc = (self.api.exit)();
        self.trace.log(&format!("{}==ydb_exit()", rc));
        rc
    }
}

/// The installation path with a trailing separator guaranteed.
fn library_directory(shdir: &str) -> String {
    let mut dir = shdir.to_string();
    if !dir.ends_with('/') && !dir.ends_with('\\') {
        dir.push('/');
    }
    dir
}

fn candidate_paths(libdir: &str) -> Vec<String> {
    let names: &[&str] = if cfg!(windows) {
        &["yottadb.dll"]
    } else if cfg!(target_os = "macos") {
        &["libyottadb.dylib", "libyottadb.so"]
    } else {
        &["libyottadb.so", "libyottadb.dylib"]
    };
    names
        .iter()
        .map(|name| format!("{}{}", libdir, name))
        .collect()
}

/// The variable-name view: the first argument, caret included.
fn name_view(args: &[Argument<'_>]) -> YdbBuffer {
    let bytes = args.first().map(|arg| arg.bytes()).unwrap_or(b"");
    YdbBuffer::from_bytes(bytes)
}

/// Subscript views over everything behind the name; `skip_last` leaves
/// the trailing value or increment out.
fn subscript_views(args: &[Argument<'_>], skip_last: bool) -> Vec<YdbBuffer> {
    let end = if skip_last {
        args.len().saturating_sub(1)
    } else {
        args.len()
    };
    args.get(1..end)
        .unwrap_or(&[])
        .iter()
        .map(|arg| YdbBuffer::from_bytes(arg.bytes()))
        .collect()
}

/// The trailing value argument, empty when the request carries none.
fn value_bytes<'a>(args: &'a [Argument<'_>]) -> &'a [u8] {
    if args.len() >= 2 {
        args.last().map(|arg| arg.bytes()).unwrap_or(b"")
    } else {
        b""
    }
}

fn vector_ptr(subs: &[YdbBuffer]) -> *const YdbBuffer {
    if subs.is_empty() {
        std::ptr::null()
    } else {
        subs.as_ptr()
    }
}

/// A NUL-terminated copy of a counted payload. Interior NULs cut the
/// value short, as they would in C.
fn c_bytes(bytes: &[u8]) -> Vec<u8> {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    let mut buf = Vec::with_capacity(end + 1);
    buf.extend_from_slice(&bytes[..end]);
    buf.push(0);
    buf
}

/// Pick the version fields out of a `$zv` report.
///
/// The token starts at the first digit behind a `V` and only counts when
/// it reads as a positive number. Minor follows the first dot, build the
/// first dash. The display text is formatted even when nothing was
/// recognized.
fn parse_ydb_zv(text: &str) -> EngineVersion {
    let bytes = text.as_bytes();
    let mut token: Option<&str> = None;
    for n in 1..bytes.len() {
        if bytes[n - 1] == b'V' && bytes[n].is_ascii_digit() {
            token = Some(&text[n..]);
            break;
        }
    }

    let (major, minor, build, number) = match token.filter(|tail| leading_f64(tail) > 0.0) {
        Some(tail) => {
            let major = leading_i32(tail);
            let minor = tail
                .find('.')
                .map(|idx| leading_i32(&tail[idx + 1..]))
                .unwrap_or(0);
            let build = tail
                .find('-')
                .map(|idx| leading_i32(&tail[idx + 1..]))
                .unwrap_or(0);
            let number = (major * 100_000 + minor * 10_000 + build) as u32;
            (major, minor, build, number)
        }
        None => (0, 0, 0, 0),
    };

    EngineVersion {
        product: EngineKind::YottaDb,
        major,
        minor,
        build,
        number,
        text: format!("{}.{}.b{}", major, minor, build),
    }
}
