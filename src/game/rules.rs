use crate::game::board::{cell_at, Cell, Grid, Move, Seat};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Who the forbidden-shape restriction applies to.
///
/// `WhiteOnlyAllowed` is the classic renju handicap: Black, who moves
/// first, is restricted while White is exempt.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum DoubleThreeMode {
    BothAllowed,
    WhiteOnlyAllowed,
    BothForbidden,
}

/// Serializable description of a rule. The factory rebuilds the runtime
/// validator from it, so an active rule set survives the round-trip
/// through a game-sync snapshot to a newly joined peer.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum RuleDescriptor {
    DoubleThree { mode: DoubleThreeMode },
}

impl RuleDescriptor {
    pub fn build(&self) -> Box<dyn Rule> {
        match self {
            RuleDescriptor::DoubleThree { mode } => Box::new(DoubleThreeRule::new(*mode)),
        }
    }
}

/// Why a placement was refused; shown verbatim to the offending player.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Violation(pub String);

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A placement validator. `check` judges a hypothetical move against a
/// snapshot of the grid; implementations copy the grid before writing the
/// candidate so the live board is never touched.
pub trait Rule: Send + Sync {
    fn descriptor(&self) -> RuleDescriptor;
    fn check(&self, grid: &Grid, mv: &Move) -> Result<(), Violation>;
}

/// the four scan axes: horizontal, vertical, both diagonals
const AXES: [(i32, i32); 4] = [(1, 0), (0, 1), (1, 1), (1, -1)];

/// Length of the contiguous same-color run through `(x, y)` along `dir`,
/// plus the run's end offsets relative to the seed cell.
pub(crate) fn run_through(
    grid: &Grid,
    x: i32,
    y: i32,
    (dx, dy): (i32, i32),
    color: Cell,
) -> (usize, i32, i32) {
    let mut lo = 0;
    while cell_at(grid, x + dx * (lo - 1), y + dy * (lo - 1)) == Some(color) {
        lo -= 1;
    }
    let mut hi = 0;
    while cell_at(grid, x + dx * (hi + 1), y + dy * (hi + 1)) == Some(color) {
        hi += 1;
    }
    ((hi - lo + 1) as usize, lo, hi)
}

fn flanks_open(grid: &Grid, x: i32, y: i32, (dx, dy): (i32, i32), lo: i32, hi: i32) -> bool {
    cell_at(grid, x + dx * (lo - 1), y + dy * (lo - 1)) == Some(Cell::Empty)
        && cell_at(grid, x + dx * (hi + 1), y + dy * (hi + 1)) == Some(Cell::Empty)
}

enum AxisShape {
    Five,
    Overline,
    OpenFour,
    OpenThree,
    Nothing,
}

/// Classify one axis with the candidate already on the grid. Shapes are
/// exclusive per axis: five > overline > open four > open three.
fn classify_axis(grid: &Grid, x: i32, y: i32, dir: (i32, i32), color: Cell) -> AxisShape {
    let (len, lo, hi) = run_through(grid, x, y, dir, color);
    if len == 5 {
        return AxisShape::Five;
    }
    if len >= 6 {
        return AxisShape::Overline;
    }
    if len == 4 && flanks_open(grid, x, y, dir, lo, hi) {
        return AxisShape::OpenFour;
    }
    // Open three: some empty cell within four steps along the axis turns
    // the shape into an open four containing both that cell and the
    // candidate. The containment requirement covers jump threes while
    // keeping unrelated stones further out from counting.
    for step in -4i32..=4 {
        if step == 0 {
            continue;
        }
        let (ex, ey) = (x + dir.0 * step, y + dir.1 * step);
        if cell_at(grid, ex, ey) != Some(Cell::Empty) {
            continue;
        }
        let mut trial = *grid;
        trial[ex as usize][ey as usize] = color;
        let (tlen, tlo, thi) = run_through(&trial, x, y, dir, color);
        if tlen == 4 && tlo <= step && step <= thi && flanks_open(&trial, x, y, dir, tlo, thi) {
            return AxisShape::OpenThree;
        }
    }
    AxisShape::Nothing
}

/// The renju forbidden-move validator: rejects double-threes,
/// double-fours and overlines for the restricted color. A true five on
/// any axis always overrides and permits the move.
pub struct DoubleThreeRule {
    mode: DoubleThreeMode,
}

impl DoubleThreeRule {
    pub fn new(mode: DoubleThreeMode) -> Self {
        DoubleThreeRule { mode }
    }
}

impl Rule for DoubleThreeRule {
    fn descriptor(&self) -> RuleDescriptor {
        RuleDescriptor::DoubleThree { mode: self.mode }
    }

    fn check(&self, grid: &Grid, mv: &Move) -> Result<(), Violation> {
        if self.mode == DoubleThreeMode::BothAllowed {
            return Ok(());
        }
        if self.mode == DoubleThreeMode::WhiteOnlyAllowed && mv.color == Seat::White {
            return Ok(());
        }
        let color = mv.color.stone();
        let (x, y) = (mv.x as i32, mv.y as i32);
        let mut scratch = *grid;
        scratch[mv.x as usize][mv.y as usize] = color;

        let mut overline = false;
        let mut fours = 0;
        let mut threes = 0;
        for dir in AXES {
            match classify_axis(&scratch, x, y, dir, color) {
                AxisShape::Five => return Ok(()),
                AxisShape::Overline => overline = true,
                AxisShape::OpenFour => fours += 1,
                AxisShape::OpenThree => threes += 1,
                AxisShape::Nothing => {}
            }
        }
        if overline {
            Err(Violation("overline (six or more in a row) is forbidden".into()))
        } else if fours >= 2 {
            Err(Violation("double four is forbidden".into()))
        } else if threes >= 2 {
            Err(Violation("double three is forbidden".into()))
        } else {
            Ok(())
        }
    }
}
