// Common test utilities for integration tests
//
// A `NativeLinker` backed by a table of real `extern "C"` functions, each
// with an adapter that unpacks marshaled arguments. Upcalls hand out fake
// addresses that route back into the stored trampoline.

#![allow(dead_code)]

use std::collections::HashMap;
use std::ffi::{CStr, c_char};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use marshal::{
    Address, Arena, CallDescriptor, CleanupFn, Error, NativeLinker, Primitive, Registry, Result,
    Segment, Serialized, Trampoline,
};

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

pub extern "C" fn add(a: i32, b: i32) -> i32 {
    a + b
}

pub extern "C" fn scale(p: Point, k: f64) -> Point {
    Point {
        x: p.x * k,
        y: p.y * k,
    }
}

/// # Safety
///
/// `s` must be a NUL-terminated string.
pub unsafe extern "C" fn c_len(s: *const c_char) -> i64 {
    // SAFETY: guaranteed by the caller.
    unsafe { CStr::from_ptr(s) }.to_bytes().len() as i64
}

type Adapter =
    Arc<dyn Fn(&TestLinker, &CallDescriptor, &[Serialized], &Arena) -> Result<Serialized> + Send + Sync>;

/// Base of the fake addresses handed out for upcalls.
const UPCALL_BASE: usize = 0x7f00_0000_0000;

pub struct TestLinker {
    functions: Mutex<HashMap<Address, Adapter>>,
    upcalls: Arc<Mutex<HashMap<Address, Arc<Trampoline>>>>,
    next_upcall: AtomicUsize,
}

fn int_arg(args: &[Serialized], i: usize) -> Result<i32> {
    match args.get(i).and_then(Serialized::as_primitive) {
        Some(Primitive::Int(v)) => Ok(v),
        other => Err(Error::host(format!("argument {i}: expected int, got {other:?}"))),
    }
}

fn double_arg(args: &[Serialized], i: usize) -> Result<f64> {
    match args.get(i).and_then(Serialized::as_primitive) {
        Some(Primitive::Double(v)) => Ok(v),
        other => Err(Error::host(format!("argument {i}: expected double, got {other:?}"))),
    }
}

fn pointer_arg(args: &[Serialized], i: usize) -> Result<Address> {
    match args.get(i).and_then(Serialized::as_primitive) {
        Some(Primitive::Pointer(a)) => Ok(a),
        other => Err(Error::host(format!("argument {i}: expected pointer, got {other:?}"))),
    }
}

fn segment_arg(args: &[Serialized], i: usize) -> Result<&Segment> {
    args.get(i)
        .and_then(Serialized::as_segment)
        .ok_or_else(|| Error::host(format!("argument {i}: expected aggregate")))
}

impl TestLinker {
    pub fn new() -> Self {
        TestLinker {
            functions: Mutex::new(HashMap::new()),
            upcalls: Arc::new(Mutex::new(HashMap::new())),
            next_upcall: AtomicUsize::new(0),
        }
    }

    /// A linker knowing `add`, `scale`, `c_len` and `apply`.
    pub fn with_fixtures() -> Arc<Self> {
        let linker = Self::new();
        linker.define(add_address(), |_, _, args, _| {
            Ok(Primitive::Int(add(int_arg(args, 0)?, int_arg(args, 1)?)).into())
        });
        linker.define(scale_address(), |_, _, args, arena| {
            let p = segment_arg(args, 0)?;
            let point = Point {
                x: p.read::<f64>(0)?,
                y: p.read::<f64>(8)?,
            };
            let scaled = scale(point, double_arg(args, 1)?);
            let out = arena.alloc(16, 8)?;
            out.write::<f64>(0, scaled.x)?;
            out.write::<f64>(8, scaled.y)?;
            Ok(Serialized::Segment(out))
        });
        linker.define(c_len_address(), |_, _, args, _| {
            let s = pointer_arg(args, 0)?;
            // SAFETY: c-string arguments are terminated by the serializer.
            Ok(Primitive::Long(unsafe { c_len(s.as_ptr::<c_char>()) }).into())
        });
        // apply(f, x) = f(x), with `f` an upcall address
        linker.define(apply_address(), |linker, _, args, _| {
            let f = pointer_arg(args, 0)?;
            let x = int_arg(args, 1)?;
            linker.invoke_upcall(f, &[Primitive::Int(x).into()])
        });
        Arc::new(linker)
    }

    pub fn define(
        &self,
        address: Address,
        adapter: impl Fn(&TestLinker, &CallDescriptor, &[Serialized], &Arena) -> Result<Serialized>
        + Send
        + Sync
        + 'static,
    ) {
        self.functions
            .lock()
            .unwrap()
            .insert(address, Arc::new(adapter));
    }

    /// Calls an upcall address the way native code would.
    pub fn invoke_upcall(&self, address: Address, args: &[Serialized]) -> Result<Serialized> {
        let trampoline = self.upcalls.lock().unwrap().get(&address).cloned();
        match trampoline {
            Some(t) => Ok(t.invoke(args)),
            None => Err(Error::host(format!("no upcall at {address}"))),
        }
    }

    pub fn upcall_count(&self) -> usize {
        self.upcalls.lock().unwrap().len()
    }
}

impl NativeLinker for TestLinker {
    unsafe fn downcall(
        &self,
        address: Address,
        desc: &CallDescriptor,
        args: &[Serialized],
        arena: &Arena,
    ) -> Result<Serialized> {
        let adapter = self.functions.lock().unwrap().get(&address).cloned();
        match adapter {
            Some(adapter) => adapter(self, desc, args, arena),
            None => self.invoke_upcall(address, args),
        }
    }

    fn upcall(&self, trampoline: Arc<Trampoline>, arena: &Arena) -> Result<Address> {
        let n = self.next_upcall.fetch_add(1, Ordering::Relaxed);
        let address = Address::new(UPCALL_BASE + n * 16);
        self.upcalls.lock().unwrap().insert(address, trampoline);

        let upcalls = Arc::clone(&self.upcalls);
        // SAFETY: the zero-length view covers no memory.
        let stub = unsafe { Segment::from_raw(address, 0) };
        let release: CleanupFn = Box::new(move |addr| {
            upcalls.lock().unwrap().remove(&addr);
        });
        unsafe { stub.reinterpret_in(0, arena, Some(release))? };
        Ok(address)
    }
}

type AddFn = extern "C" fn(i32, i32) -> i32;
type ScaleFn = extern "C" fn(Point, f64) -> Point;
type CLenFn = unsafe extern "C" fn(*const c_char) -> i64;

pub fn add_address() -> Address {
    Address::new(add as AddFn as usize)
}

pub fn scale_address() -> Address {
    Address::new(scale as ScaleFn as usize)
}

pub fn c_len_address() -> Address {
    Address::new(c_len as CLenFn as usize)
}

/// Stand-in address for a native higher-order function.
pub fn apply_address() -> Address {
    Address::new(0x6000_0000_0010)
}

/// A registry with a fresh [`TestLinker`] installed.
pub fn linked_registry() -> (Registry, Arc<TestLinker>) {
    let registry = Registry::new();
    let linker = TestLinker::with_fixtures();
    registry.set_linker(linker.clone());
    (registry, linker)
}
