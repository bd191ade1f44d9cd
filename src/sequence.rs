use parking_lot::Mutex;

use crate::*;

/// An auto-increment generator a space can be attached to.
#[derive(Debug)]
pub struct Sequence {
    pub name: String,
    pub start: i64,
    pub step: i64,
    pub min: i64,
    pub max: i64,
    pub cycle: bool,
    value: Mutex<Option<i64>>,
}

impl Sequence {
    pub fn new<S: Into<String>>(name: S) -> Sequence {
        Sequence {
            name: name.into(),
            start: 1,
            step: 1,
            min: 1,
            max: i64::MAX,
            cycle: false,
            value: Mutex::new(None),
        }
    }

    pub fn step(mut self, step: i64) -> Sequence {
        self.step = step;
        self
    }

    pub fn bounds(mut self, min: i64, max: i64) -> Sequence {
        self.min = min;
        self.max = max;
        self.start = self.start.clamp(min, max);
        self
    }

    pub fn cycle(mut self, cycle: bool) -> Sequence {
        self.cycle = cycle;
        self
    }

    /// The last value handed out, if any.
    pub fn current(&self) -> Option<i64> {
        *self.value.lock()
    }

    /// Moves the sequence forward to at least `value`. Values behind the
    /// current one are ignored.
    pub fn set(&self, value: i64) {
        let mut current = self.value.lock();
        let ahead = match *current {
            None => true,
            Some(c) if self.step > 0 => value > c,
            Some(c) => value < c,
        };
        if ahead {
            *current = Some(value);
        }
    }

    pub fn next(&self) -> Result<i64> {
        let mut current = self.value.lock();
        let next = match *current {
            None => self.start,
            Some(c) => match c.checked_add(self.step) {
                Some(n) if n >= self.min && n <= self.max => n,
                _ if self.cycle => {
                    if self.step > 0 { self.min } else { self.max }
                }
                _ => {
                    return Err(Error::unsupported(format!(
                        "sequence '{}' is exhausted",
                        self.name
                    )));
                }
            },
        };
        *current = Some(next);
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_only_when_cycling() {
        let seq = Sequence::new("s").bounds(1, 3);
        assert_eq!(seq.next().unwrap(), 1);
        seq.set(3);
        assert!(seq.next().is_err());

        let seq = Sequence::new("c").bounds(1, 2).cycle(true);
        assert_eq!(
            (0..3).map(|_| seq.next().unwrap()).collect::<Vec<_>>(),
            vec![1, 2, 1]
        );
    }
}
