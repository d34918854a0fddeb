/// An ordered list of announcement segments with a play cursor
///
/// The cursor starts before the first segment; [`Playlist::next`] advances
/// it. Keypad navigation moves it while a prompt plays.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Playlist {
    segments: Vec<String>,
    position: Option<usize>,
}

impl Playlist {
    /// Build from a comma separated segment list
    pub fn parse(value: &str) -> Self {
        let segments = value
            .split(',')
            .map(str::trim)
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .collect();
        Self { segments, position: None }
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Advance to and return the next segment
    pub fn next(&mut self) -> Option<&str> {
        let next = self.position.map_or(0, |position| position + 1);
        if next < self.segments.len() {
            self.position = Some(next);
            self.segments.get(next).map(String::as_str)
        } else {
            self.position = Some(self.segments.len());
            None
        }
    }

    /// Step back one segment, staying on the first
    pub fn previous(&mut self) -> Option<&str> {
        let previous = self.position.map_or(0, |position| position.saturating_sub(1));
        self.seek(previous)
    }

    pub fn first(&mut self) -> Option<&str> {
        self.seek(0)
    }

    pub fn current(&mut self) -> Option<&str> {
        let current = self.position.unwrap_or(0);
        self.seek(current)
    }

    pub fn last(&mut self) -> Option<&str> {
        let last = self.segments.len().checked_sub(1)?;
        self.seek(last)
    }

    /// Move the cursor back before the first segment
    pub fn rewind(&mut self) {
        self.position = None;
    }

    fn seek(&mut self, index: usize) -> Option<&str> {
        let index = index.min(self.segments.len().checked_sub(1)?);
        self.position = Some(index);
        self.segments.get(index).map(String::as_str)
    }
}
