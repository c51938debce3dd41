#![no_main]
use libfuzzer_sys::fuzz_target;

use std::collections::BTreeMap;

use ssa_regalloc::{DataType, Location, LocationKind, SpillFillsResolver, TargetInfo};
use ssara::fuzzing::FuzzingMoves;

/// A machine where every location starts with a distinct value.
struct Machine<'a> {
    target: &'a TargetInfo,
    state: BTreeMap<Location, i64>,
}

impl<'a> Machine<'a> {
    fn new(target: &'a TargetInfo) -> Self {
        Self { target, state: BTreeMap::new() }
    }

    fn initial(&self, loc: Location) -> i64 {
        if self.target.is_zero_reg(loc) {
            return 0;
        }
        let kind = match loc.kind() {
            LocationKind::Invalid => 0,
            LocationKind::Register => 1,
            LocationKind::FpRegister => 2,
            LocationKind::StackSlot => 3,
            LocationKind::StackParameter => 4,
            LocationKind::Immediate => 5,
        };
        kind * 1000 + i64::from(loc.value())
    }

    fn read(&self, loc: Location) -> i64 {
        match self.state.get(&loc) {
            Some(&value) => value,
            None => self.initial(loc),
        }
    }
}

fuzz_target!(|input: FuzzingMoves| {
    let target = TargetInfo::new(input.arch);
    let mut sf = input.spill_fill;
    let parallel = sf.moves().to_vec();

    let mut expected = Machine::new(&target);
    let writes: Vec<_> = parallel.iter().map(|m| (m.dst, expected.read(m.src))).collect();
    expected.state.extend(writes);

    SpillFillsResolver::with_frame(&target, input.num_stack_slots, 0).resolve(&mut sf);
    assert!(sf.is_resolved());

    let mut observed = Machine::new(&target);
    for m in sf.moves() {
        assert!(!m.dst.is_immediate(), "{:?} writes an immediate", m);
        let value = observed.read(m.src);
        observed.state.insert(m.dst, value);
    }

    for (&loc, &value) in &observed.state {
        let scratch = loc == Location::stack_slot(0)
            || Some(loc) == target.temp_location(DataType::Int64)
            || Some(loc) == target.temp_location(DataType::Float64);
        if scratch && expected.state.get(&loc).is_none() {
            continue;
        }
        assert_eq!(
            expected.read(loc),
            value,
            "{} differs after resolving {:?} into {:?}",
            loc,
            parallel,
            sf.moves()
        );
    }
    for (&loc, &value) in &expected.state {
        assert_eq!(observed.read(loc), value, "{} was not written", loc);
    }
});
