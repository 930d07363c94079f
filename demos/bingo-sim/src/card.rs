//! A 5x5 bingo card with a free centre square.

use meshroom::room::GameRules;
use rand::seq::SliceRandom;

const SIZE: usize = 5;
/// Marks the free centre square.
const FREE: u16 = 0;

#[derive(Debug, Clone)]
pub struct BingoCard {
    cells: [[u16; SIZE]; SIZE],
    pool: u16,
}

impl BingoCard {
    /// Deals a card of distinct numbers from `1..=pool`.
    pub fn deal(pool: u16) -> Self {
        let pool = pool.max(24);
        let mut numbers: Vec<u16> = (1..=pool).collect();
        numbers.shuffle(&mut rand::rng());
        let mut numbers = numbers.into_iter();

        let mut cells = [[FREE; SIZE]; SIZE];
        for (r, row) in cells.iter_mut().enumerate() {
            for (c, cell) in row.iter_mut().enumerate() {
                if (r, c) != (SIZE / 2, SIZE / 2) {
                    *cell = numbers.next().unwrap_or(FREE);
                }
            }
        }
        Self { cells, pool }
    }

    #[cfg(test)]
    fn from_cells(cells: [[u16; SIZE]; SIZE]) -> Self {
        Self { cells, pool: 99 }
    }

    /// Complete rows, columns and diagonals given the numbers drawn.
    pub fn completed_lines(&self, drawn: &[u16]) -> u8 {
        let marked = |r: usize, c: usize| {
            let n = self.cells[r][c];
            n == FREE || drawn.contains(&n)
        };

        let rows = (0..SIZE).filter(|&r| (0..SIZE).all(|c| marked(r, c))).count();
        let cols = (0..SIZE).filter(|&c| (0..SIZE).all(|r| marked(r, c))).count();
        let diag = usize::from((0..SIZE).all(|i| marked(i, i)));
        let anti = usize::from((0..SIZE).all(|i| marked(i, SIZE - 1 - i)));
        (rows + cols + diag + anti) as u8
    }
}

impl GameRules for BingoCard {
    fn on_number_drawn(&mut self, _number: u16, drawn: &[u16]) -> u8 {
        self.completed_lines(drawn)
    }

    fn on_reset(&mut self) {
        *self = Self::deal(self.pool);
    }
}
