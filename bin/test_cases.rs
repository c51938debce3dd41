/* -*- Mode: Rust; tab-width: 8; indent-tabs-mode: nil; rust-indent-offset: 2 -*-
 * vim: set ts=8 sts=2 et sw=2 tw=80:
*/

/// Test cases.  The list of them is right at the bottom, function |find_graph|.
/// Add new ones there.
use ssa_regalloc::{Arch, CondCode, DataType, Graph, Opcode};

use crate::test_framework::MEM_SIZE;

const I64: DataType = DataType::Int64;
const F64: DataType = DataType::Float64;

/// A program together with the arguments it is run on.
#[derive(Clone, Debug)]
pub struct TestCase {
  pub graph: Graph,
  pub args: Vec<i64>,
}

fn float_arg(f: f64) -> i64 {
  f.to_bits() as i64
}

/// A handful of arithmetic on two parameters.
fn test_straight_line(arch: Arch) -> TestCase {
  let mut g = Graph::new("straight_line", arch);
  let entry = g.entry;
  let p0 = g.param(I64);
  let p1 = g.param(I64);
  let seven = g.constant(entry, I64, 7);
  let a = g.binary(entry, Opcode::Add, p0, p1);
  let b = g.binary(entry, Opcode::Mul, a, p0);
  let c = g.binary(entry, Opcode::Sub, b, p1);
  let d = g.binary(entry, Opcode::And, c, a);
  let e = g.binary(entry, Opcode::Add, d, seven);
  g.ret(entry, e);
  TestCase { graph: g, args: vec![3, 5] }
}

/// A select reads four registers at once.
fn test_select4(arch: Arch) -> TestCase {
  let mut g = Graph::new("select4", arch);
  let entry = g.entry;
  let a = g.param(I64);
  let b = g.param(I64);
  let one = g.constant(entry, I64, 1);
  let two = g.constant(entry, I64, 2);
  let x = g.binary(entry, Opcode::Add, a, one);
  let y = g.binary(entry, Opcode::Add, b, two);
  let s = g.value(entry, Opcode::Select(CondCode::Lt), I64, &[a, b, x, y]);
  g.ret(entry, s);
  TestCase { graph: g, args: vec![4, 9] }
}

/// Fills mem[0..n] with squares in a first loop, and sums them in a second.
fn test_fill_then_sum(arch: Arch) -> TestCase {
  let mut g = Graph::new("fill_then_sum", arch);
  let entry = g.entry;
  let fill = g.add_block();
  let sum = g.add_block();
  let exit = g.add_block();
  g.add_edge(entry, fill);
  g.add_edge(fill, fill);
  g.add_edge(fill, sum);
  g.add_edge(sum, sum);
  g.add_edge(sum, exit);

  let n = g.param(I64);
  let zero = g.constant(entry, I64, 0);
  let one = g.constant(entry, I64, 1);

  let i = g.phi(fill, I64, &[zero]);
  let sq = g.binary(fill, Opcode::Mul, i, i);
  g.append(fill, Opcode::Store, DataType::Void, &[zero, i, sq]);
  let i1 = g.binary(fill, Opcode::Add, i, one);
  g.add_phi_input(i, i1);
  g.append(fill, Opcode::If(CondCode::Lt), DataType::Void, &[i1, n]);

  let k = g.phi(sum, I64, &[zero]);
  let acc = g.phi(sum, I64, &[zero]);
  let v = g.binary(sum, Opcode::Load, zero, k);
  let acc1 = g.binary(sum, Opcode::Add, acc, v);
  let k1 = g.binary(sum, Opcode::Add, k, one);
  g.add_phi_input(k, k1);
  g.add_phi_input(acc, acc1);
  g.append(sum, Opcode::If(CondCode::Lt), DataType::Void, &[k1, n]);

  g.ret(exit, acc1);
  TestCase { graph: g, args: vec![10] }
}

/// An if-then-else joined by a phi.
fn test_diamond(arch: Arch) -> TestCase {
  let mut g = Graph::new("diamond", arch);
  let entry = g.entry;
  let left = g.add_block();
  let right = g.add_block();
  let join = g.add_block();
  g.add_edge(entry, left);
  g.add_edge(entry, right);
  g.add_edge(left, join);
  g.add_edge(right, join);

  let a = g.param(I64);
  let b = g.param(I64);
  g.append(entry, Opcode::If(CondCode::Gt), DataType::Void, &[a, b]);
  let d1 = g.binary(left, Opcode::Sub, a, b);
  let d2 = g.binary(right, Opcode::Sub, b, a);
  let m = g.phi(join, I64, &[d1, d2]);
  let s = g.binary(join, Opcode::Add, m, a);
  g.ret(join, s);
  TestCase { graph: g, args: vec![4, 11] }
}

/// An if-then whose skipping edge is critical.
fn test_critical_edge(arch: Arch) -> TestCase {
  let mut g = Graph::new("critical_edge", arch);
  let entry = g.entry;
  let then = g.add_block();
  let join = g.add_block();
  g.add_edge(entry, then);
  g.add_edge(entry, join);
  g.add_edge(then, join);

  let a = g.param(I64);
  let b = g.param(I64);
  let c = g.binary(entry, Opcode::Add, a, b);
  g.append(entry, Opcode::If(CondCode::Lt), DataType::Void, &[a, b]);
  let t = g.binary(then, Opcode::Mul, c, a);
  let phi = g.phi(join, I64, &[c, t]);
  let r = g.binary(join, Opcode::Add, phi, b);
  g.ret(join, r);
  TestCase { graph: g, args: vec![2, 3] }
}

/// Two phis swapping their values on every iteration.
fn test_swap_loop(arch: Arch) -> TestCase {
  let mut g = Graph::new("swap_loop", arch);
  let entry = g.entry;
  let header = g.add_block();
  let exit = g.add_block();
  g.add_edge(entry, header);
  g.add_edge(header, header);
  g.add_edge(header, exit);

  let a = g.param(I64);
  let b = g.param(I64);
  let n = g.param(I64);
  let zero = g.constant(entry, I64, 0);
  let one = g.constant(entry, I64, 1);
  let ten = g.constant(entry, I64, 10);

  let i = g.phi(header, I64, &[zero]);
  let x = g.phi(header, I64, &[a]);
  let y = g.phi(header, I64, &[b]);
  g.add_phi_input(x, y);
  g.add_phi_input(y, x);
  let i1 = g.binary(header, Opcode::Add, i, one);
  g.add_phi_input(i, i1);
  g.append(header, Opcode::If(CondCode::Lt), DataType::Void, &[i1, n]);

  let t = g.binary(exit, Opcode::Mul, x, ten);
  let r = g.binary(exit, Opcode::Add, t, y);
  g.ret(exit, r);
  TestCase { graph: g, args: vec![1, 2, 5] }
}

/// Values live across calls, a call with stack arguments and a zero
/// constant used after a call.
fn test_calls(arch: Arch) -> TestCase {
  let mut g = Graph::new("calls", arch);
  let entry = g.entry;
  let a = g.param(I64);
  let b = g.param(I64);
  let zero = g.constant(entry, I64, 0);
  let five = g.constant(entry, I64, 5);
  let r1 = g.call(entry, 1, I64, &[a, b]).unwrap();
  let r2 = g
    .call(entry, 2, I64, &[r1, a, b, five, a, b, r1, a, b, zero])
    .unwrap();
  let s = g.binary(entry, Opcode::Add, r2, a);
  let t = g.binary(entry, Opcode::Add, s, b);
  let u = g.binary(entry, Opcode::Add, t, zero);
  g.append(entry, Opcode::Store, DataType::Void, &[zero, zero, r1]);
  g.ret(entry, u);
  TestCase { graph: g, args: vec![7, 9] }
}

/// More parameters than parameter registers.
fn test_stack_params(arch: Arch) -> TestCase {
  let mut g = Graph::new("stack_params", arch);
  let entry = g.entry;
  let params: Vec<_> = (0..10).map(|_| g.param(I64)).collect();
  let mut acc = params[9];
  for &p in params[..9].iter().rev() {
    acc = g.binary(entry, Opcode::Sub, p, acc);
  }
  g.ret(entry, acc);
  TestCase { graph: g, args: (1..=10).map(|i| i * i).collect() }
}

/// A pair load reading back two stores.
fn test_load_pair(arch: Arch) -> TestCase {
  let mut g = Graph::new("load_pair", arch);
  let entry = g.entry;
  let a = g.param(I64);
  let b = g.param(I64);
  let base = g.constant(entry, I64, 0);
  let four = g.constant(entry, I64, 4);
  let five = g.constant(entry, I64, 5);
  g.append(entry, Opcode::Store, DataType::Void, &[base, four, a]);
  g.append(entry, Opcode::Store, DataType::Void, &[base, five, b]);
  let pair = g.append(entry, Opcode::LoadPair, I64, &[base, four]);
  let (x, y) = (g.insts[pair].results[0], g.insts[pair].results[1]);
  let r = g.binary(entry, Opcode::Sub, x, y);
  g.ret(entry, r);
  TestCase { graph: g, args: vec![40, 2] }
}

/// Twelve values live at the same time.
fn test_pressure(arch: Arch) -> TestCase {
  let mut g = Graph::new("pressure", arch);
  let entry = g.entry;
  let a = g.param(I64);
  let b = g.param(I64);
  let vals: Vec<_> = (1..=12)
    .map(|k| {
      let c = g.constant(entry, I64, k);
      let m = g.binary(entry, Opcode::Mul, a, c);
      g.binary(entry, Opcode::Add, m, b)
    })
    .collect();
  let mut acc = vals[11];
  for &v in vals[..11].iter().rev() {
    acc = g.binary(entry, Opcode::Sub, v, acc);
  }
  g.ret(entry, acc);
  TestCase { graph: g, args: vec![3, 1] }
}

/// Floating-point values live across a call.
fn test_fp(arch: Arch) -> TestCase {
  let mut g = Graph::new("fp", arch);
  let entry = g.entry;
  let x = g.param(F64);
  let y = g.param(F64);
  let slot = g.param(I64);
  let base = g.constant(entry, I64, 0);
  let c = g.binary(entry, Opcode::Mul, x, y);
  let d = g.binary(entry, Opcode::Add, c, x);
  let r = g.call(entry, 7, F64, &[d, y]).unwrap();
  g.append(entry, Opcode::Store, DataType::Void, &[base, slot, r]);
  let e = g.binary(entry, Opcode::Sub, d, y);
  let f = g.binary(entry, Opcode::Mul, e, c);
  let m = g.value(entry, Opcode::Select(CondCode::Lt), F64, &[e, f, e, f]);
  g.ret(entry, m);
  TestCase { graph: g, args: vec![float_arg(1.5), float_arg(2.25), 3] }
}

/// Two nested loops with accumulators carried through both.
fn test_nested_loops(arch: Arch) -> TestCase {
  let mut g = Graph::new("nested_loops", arch);
  let entry = g.entry;
  let outer = g.add_block();
  let inner = g.add_block();
  let latch = g.add_block();
  let exit = g.add_block();
  g.add_edge(entry, outer);
  g.add_edge(outer, inner);
  g.add_edge(inner, inner);
  g.add_edge(inner, latch);
  g.add_edge(latch, outer);
  g.add_edge(latch, exit);

  let n = g.param(I64);
  let zero = g.constant(entry, I64, 0);
  let one = g.constant(entry, I64, 1);

  let i = g.phi(outer, I64, &[zero]);
  let s = g.phi(outer, I64, &[zero]);

  let j = g.phi(inner, I64, &[zero]);
  let t = g.phi(inner, I64, &[s]);
  let p = g.binary(inner, Opcode::Mul, i, j);
  let t1 = g.binary(inner, Opcode::Add, t, p);
  let j1 = g.binary(inner, Opcode::Add, j, one);
  g.add_phi_input(j, j1);
  g.add_phi_input(t, t1);
  g.append(inner, Opcode::If(CondCode::Lt), DataType::Void, &[j1, n]);

  let s2 = g.binary(latch, Opcode::Add, t1, i);
  let i1 = g.binary(latch, Opcode::Add, i, one);
  g.add_phi_input(i, i1);
  g.add_phi_input(s, s2);
  g.append(latch, Opcode::If(CondCode::Lt), DataType::Void, &[i1, n]);

  g.ret(exit, s2);
  TestCase { graph: g, args: vec![6] }
}

/// A call in a loop, with a parameter live across all iterations.
fn test_call_loop(arch: Arch) -> TestCase {
  let mut g = Graph::new("call_loop", arch);
  let entry = g.entry;
  let header = g.add_block();
  let exit = g.add_block();
  g.add_edge(entry, header);
  g.add_edge(header, header);
  g.add_edge(header, exit);

  let a = g.param(I64);
  let zero = g.constant(entry, I64, 0);
  let one = g.constant(entry, I64, 1);
  let four = g.constant(entry, I64, 4);
  let mask = g.constant(entry, I64, 1023);

  let i = g.phi(header, I64, &[zero]);
  let acc = g.phi(header, I64, &[a]);
  let r = g.call(header, 9, I64, &[acc, i]).unwrap();
  let m = g.binary(header, Opcode::And, r, mask);
  let acc1 = g.binary(header, Opcode::Add, m, a);
  let i1 = g.binary(header, Opcode::Add, i, one);
  g.add_phi_input(i, i1);
  g.add_phi_input(acc, acc1);
  g.append(header, Opcode::If(CondCode::Lt), DataType::Void, &[i1, four]);

  let r = g.binary(exit, Opcode::Add, acc1, a);
  g.ret(exit, r);
  TestCase { graph: g, args: vec![17] }
}

/// Insertion sort of a pseudo-random array in memory.
fn test_sort(arch: Arch) -> TestCase {
  let mut g = Graph::new("sort", arch);
  let entry = g.entry;
  let fill = g.add_block();
  let outer = g.add_block();
  let inner = g.add_block();
  let check = g.add_block();
  let shift = g.add_block();
  let place = g.add_block();
  let exit = g.add_block();
  g.add_edge(entry, fill);
  g.add_edge(fill, fill);
  g.add_edge(fill, outer);
  g.add_edge(outer, inner);
  g.add_edge(inner, place);
  g.add_edge(inner, check);
  g.add_edge(check, shift);
  g.add_edge(check, place);
  g.add_edge(shift, inner);
  g.add_edge(place, outer);
  g.add_edge(place, exit);

  let n = g.param(I64);
  let zero = g.constant(entry, I64, 0);
  let one = g.constant(entry, I64, 1);
  let mul = g.constant(entry, I64, 37);
  let add = g.constant(entry, I64, 11);
  let mask = g.constant(entry, I64, 63);
  let thousand = g.constant(entry, I64, 1000);

  // mem[i] = (i * 37 + 11) & 63
  let fi = g.phi(fill, I64, &[zero]);
  let t0 = g.binary(fill, Opcode::Mul, fi, mul);
  let t1 = g.binary(fill, Opcode::Add, t0, add);
  let t2 = g.binary(fill, Opcode::And, t1, mask);
  g.append(fill, Opcode::Store, DataType::Void, &[zero, fi, t2]);
  let fi1 = g.binary(fill, Opcode::Add, fi, one);
  g.add_phi_input(fi, fi1);
  g.append(fill, Opcode::If(CondCode::Lt), DataType::Void, &[fi1, n]);

  let i = g.phi(outer, I64, &[one]);
  let key = g.binary(outer, Opcode::Load, zero, i);
  let j0 = g.binary(outer, Opcode::Sub, i, one);

  let j = g.phi(inner, I64, &[j0]);
  g.append(inner, Opcode::If(CondCode::Lt), DataType::Void, &[j, zero]);

  let mj = g.binary(check, Opcode::Load, zero, j);
  g.append(check, Opcode::If(CondCode::Gt), DataType::Void, &[mj, key]);

  let jp1 = g.binary(shift, Opcode::Add, j, one);
  g.append(shift, Opcode::Store, DataType::Void, &[zero, jp1, mj]);
  let j1 = g.binary(shift, Opcode::Sub, j, one);
  g.add_phi_input(j, j1);

  let slot = g.binary(place, Opcode::Add, j, one);
  g.append(place, Opcode::Store, DataType::Void, &[zero, slot, key]);
  let i1 = g.binary(place, Opcode::Add, i, one);
  g.add_phi_input(i, i1);
  g.append(place, Opcode::If(CondCode::Lt), DataType::Void, &[i1, n]);

  let last = g.binary(exit, Opcode::Sub, n, one);
  let hi = g.binary(exit, Opcode::Load, zero, last);
  let lo = g.binary(exit, Opcode::Load, zero, zero);
  let scaled = g.binary(exit, Opcode::Mul, hi, thousand);
  let r = g.binary(exit, Opcode::Add, scaled, lo);
  g.ret(exit, r);
  TestCase { graph: g, args: vec![20] }
}

/// Sums the words of memory a call-free loop writes, walking back from the
/// top of memory.
fn test_high_memory(arch: Arch) -> TestCase {
  let mut g = Graph::new("high_memory", arch);
  let entry = g.entry;
  let header = g.add_block();
  let exit = g.add_block();
  g.add_edge(entry, header);
  g.add_edge(header, header);
  g.add_edge(header, exit);

  let seed = g.param(I64);
  let top = g.constant(entry, I64, MEM_SIZE as i64 - 2);
  let base = g.constant(entry, I64, 0);
  let one = g.constant(entry, I64, 1);
  let stop = g.constant(entry, I64, MEM_SIZE as i64 - 12);

  let addr = g.phi(header, I64, &[top]);
  let acc = g.phi(header, I64, &[seed]);
  g.append(header, Opcode::Store, DataType::Void, &[base, addr, acc]);
  let pair = g.append(header, Opcode::LoadPair, I64, &[base, addr]);
  let (lo, hi) = (g.insts[pair].results[0], g.insts[pair].results[1]);
  let sum = g.binary(header, Opcode::Add, lo, hi);
  let acc1 = g.binary(header, Opcode::Add, sum, one);
  let addr1 = g.binary(header, Opcode::Sub, addr, one);
  g.add_phi_input(addr, addr1);
  g.add_phi_input(acc, acc1);
  g.append(header, Opcode::If(CondCode::Gt), DataType::Void, &[addr1, stop]);

  g.ret(exit, acc1);
  TestCase { graph: g, args: vec![5] }
}

type Builder = fn(Arch) -> TestCase;

const ALL_TESTS: &[(&str, Builder)] = &[
  ("straight_line", test_straight_line),
  ("select4", test_select4),
  ("fill_then_sum", test_fill_then_sum),
  ("diamond", test_diamond),
  ("critical_edge", test_critical_edge),
  ("swap_loop", test_swap_loop),
  ("calls", test_calls),
  ("stack_params", test_stack_params),
  ("load_pair", test_load_pair),
  ("pressure", test_pressure),
  ("fp", test_fp),
  ("nested_loops", test_nested_loops),
  ("call_loop", test_call_loop),
  ("sort", test_sort),
  ("high_memory", test_high_memory),
];

pub fn all_test_names() -> Vec<&'static str> {
  ALL_TESTS.iter().map(|(name, _)| *name).collect()
}

pub fn find_graph(name: &str, arch: Arch) -> Result<TestCase, Vec<String>> {
  match ALL_TESTS.iter().find(|(cand, _)| *cand == name) {
    Some((_, build)) => Ok(build(arch)),
    None => {
      let mut all_names: Vec<String> =
        all_test_names().into_iter().map(String::from).collect();
      all_names.sort();
      Err(all_names)
    }
  }
}
