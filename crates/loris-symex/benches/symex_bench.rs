use criterion::{black_box, criterion_group, criterion_main, Criterion};
use indexmap::IndexMap;

use loris_ir::{
    Expr, GotoFunction, GotoProgram, Instruction, InstructionKind, SourceLocation, SymbolTable,
    Type,
};
use loris_symex::{Executor, LifoPathStorage, SymexConfig, UnwindLimits};

fn sym(name: &str) -> Expr {
    Expr::symbol_name(name, Type::signed_int())
}

fn n(value: i64) -> Expr {
    Expr::int(value, Type::signed_int())
}

fn instruction(kind: InstructionKind) -> Instruction {
    Instruction::new(kind, SourceLocation::built_in())
}

/// A long chain of dependent assignments.
fn straight_line(length: usize) -> IndexMap<String, GotoFunction> {
    let mut instructions = vec![instruction(InstructionKind::Decl { symbol: sym("x") })];
    instructions.push(instruction(InstructionKind::Assign {
        lhs: sym("x"),
        rhs: n(0),
    }));
    for _ in 0..length {
        instructions.push(instruction(InstructionKind::Assign {
            lhs: sym("x"),
            rhs: sym("x").add(n(1)),
        }));
    }
    instructions.push(instruction(InstructionKind::EndFunction));
    let main = GotoFunction::new(
        "main",
        vec![],
        Type::signed_int(),
        GotoProgram::new(instructions),
    );
    [("main".to_string(), main)].into_iter().collect()
}

/// A counting loop unwound to the given bound.
fn counting_loop(bound: usize) -> (IndexMap<String, GotoFunction>, SymexConfig) {
    let instructions = vec![
        instruction(InstructionKind::Decl { symbol: sym("i") }),
        instruction(InstructionKind::Decl { symbol: sym("n") }),
        instruction(InstructionKind::Assign {
            lhs: sym("i"),
            rhs: n(0),
        }),
        instruction(InstructionKind::Goto {
            condition: sym("i").lt(sym("n")).not(),
            target: 6,
        }),
        instruction(InstructionKind::Assign {
            lhs: sym("i"),
            rhs: sym("i").add(n(1)),
        }),
        instruction(InstructionKind::Goto {
            condition: Expr::truth(),
            target: 3,
        }),
        instruction(InstructionKind::Skip),
        instruction(InstructionKind::EndFunction),
    ];
    let main = GotoFunction::new(
        "main",
        vec![],
        Type::signed_int(),
        GotoProgram::new(instructions),
    );
    let mut unwind = UnwindLimits::default();
    unwind.set_loop_bound("main", 3, bound);
    let config = SymexConfig {
        unwind,
        ..SymexConfig::default()
    };
    (
        [("main".to_string(), main)].into_iter().collect(),
        config,
    )
}

fn bench_straight_line(c: &mut Criterion) {
    let functions = straight_line(512);
    let outer = SymbolTable::new();
    c.bench_function("symex_straight_line_512", |b| {
        b.iter(|| {
            let mut storage = LifoPathStorage::new();
            let mut executor = Executor::new(SymexConfig::default(), &outer, &mut storage);
            let mut table = SymbolTable::new();
            executor
                .symex_from_entry_point(black_box(&functions), &mut table)
                .unwrap()
        })
    });
}

fn bench_loop_unwinding(c: &mut Criterion) {
    let (functions, config) = counting_loop(64);
    let outer = SymbolTable::new();
    c.bench_function("symex_loop_unwind_64", |b| {
        b.iter(|| {
            let mut storage = LifoPathStorage::new();
            let mut executor = Executor::new(config.clone(), &outer, &mut storage);
            let mut table = SymbolTable::new();
            executor
                .symex_from_entry_point(black_box(&functions), &mut table)
                .unwrap()
        })
    });
}

criterion_group!(benches, bench_straight_line, bench_loop_unwinding);
criterion_main!(benches);
