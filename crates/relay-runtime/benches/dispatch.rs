//! Callback dispatch benchmarks
//!
//! Measures:
//! - Native call-in through a bound trampoline
//! - Foreign call that calls back once
//! - Cache lookup for an already bound callable

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use relay_runtime::{CallOptions, Callable, Runtime, Value};

extern "C" fn pass_s32(f: extern "C" fn(i32) -> i32, v: i32) -> i32 {
    f(v)
}

fn increment() -> Callable {
    Callable::from_closure(|args| Ok(Value::Int(args[0].as_int().unwrap_or(0) + 1)))
}

// ============================================================================
// Dispatch Benchmarks
// ============================================================================

fn bench_direct_call_in(c: &mut Criterion) {
    let runtime = Runtime::new();
    let sig = runtime.callback(&["int".into()], "int").unwrap();
    let callable = increment();
    let binding = runtime.bind(&sig, Some(&callable)).unwrap();
    let f: extern "C" fn(i32) -> i32 = unsafe { std::mem::transmute(binding.as_ptr()) };

    c.bench_function("dispatch_direct_call_in", |b| {
        b.iter(|| f(black_box(41)));
    });
}

fn bench_foreign_round_trip(c: &mut Criterion) {
    let runtime = Runtime::new();
    let sig = runtime.callback(&["int".into()], "int").unwrap();
    let caller = unsafe {
        runtime.attach(
            pass_s32 as *const (),
            &[sig.into(), "int".into()],
            "int",
            CallOptions::default(),
        )
    }
    .unwrap();
    let args = [Value::Callable(increment()), Value::Int(41)];

    c.bench_function("dispatch_foreign_round_trip", |b| {
        b.iter(|| caller.call(black_box(&args)).unwrap());
    });
}

fn bench_cached_bind(c: &mut Criterion) {
    let runtime = Runtime::new();
    let sig = runtime.callback(&["int".into()], "int").unwrap();
    let callable = increment();
    let _warm = runtime.bind(&sig, Some(&callable)).unwrap();

    c.bench_function("dispatch_cached_bind", |b| {
        b.iter(|| runtime.bind(black_box(&sig), Some(&callable)).unwrap());
    });
}

criterion_group!(
    benches,
    bench_direct_call_in,
    bench_foreign_round_trip,
    bench_cached_bind
);
criterion_main!(benches);
