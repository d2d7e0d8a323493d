//! Class label lookup
//!
//! Ultralytics ONNX exports store the class map as a Python dict literal in the
//! `names` metadata entry, e.g. `{0: 'person', 1: 'bicycle'}`.

use std::borrow::Cow;
use std::fmt;

/// COCO class names used by the stock YOLOv8 weights
pub const COCO_NAMES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch", "potted plant",
    "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote", "keyboard", "cell phone",
    "microwave", "oven", "toaster", "sink", "refrigerator", "book", "clock", "vase", "scissors",
    "teddy bear", "hair drier", "toothbrush",
];

/// Largest class id accepted from model metadata
pub const MAX_CLASS_ID: usize = 100_000;

/// Ordered class names indexed by class id
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassNames {
    names: Vec<String>,
}

/// Error from parsing a `names` metadata string
#[derive(Debug, Clone, PartialEq)]
pub struct LabelParseError {
    pub position: usize,
    pub message: &'static str,
}

impl fmt::Display for LabelParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at byte {}", self.message, self.position)
    }
}

impl std::error::Error for LabelParseError {}

impl ClassNames {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    /// The 80 COCO classes
    pub fn coco() -> Self {
        Self::new(COCO_NAMES.iter().map(|s| s.to_string()).collect())
    }

    /// Best guess when the model carries no names: COCO for 80-class models,
    /// otherwise no names at all.
    pub fn for_class_count(num_classes: usize) -> Self {
        if num_classes == COCO_NAMES.len() {
            Self::coco()
        } else {
            Self::default()
        }
    }

    /// Parse an Ultralytics `names` dict literal.
    ///
    /// Keys missing from the dict are filled with `class<N>`. Keys above
    /// [`MAX_CLASS_ID`] are rejected.
    pub fn parse_ultralytics(input: &str) -> Result<Self, LabelParseError> {
        let mut parser = DictParser::new(input);
        let entries = parser.parse()?;

        // parse_key bounds every id by MAX_CLASS_ID
        let len = entries
            .iter()
            .filter_map(|(id, _)| id.checked_add(1))
            .max()
            .unwrap_or(0);
        let mut names: Vec<String> = (0..len).map(|i| format!("class{}", i)).collect();
        for (id, name) in entries {
            names[id] = name;
        }

        Ok(Self::new(names))
    }

    /// Name for a class id, or `class<N>` when the id is unknown
    pub fn name(&self, class_id: i32) -> Cow<'_, str> {
        usize::try_from(class_id)
            .ok()
            .and_then(|idx| self.names.get(idx))
            .map(|name| Cow::Borrowed(name.as_str()))
            .unwrap_or_else(|| Cow::Owned(format!("class{}", class_id)))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

struct DictParser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> DictParser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn error(&self, message: &'static str) -> LabelParseError {
        LabelParseError {
            position: self.pos,
            message,
        }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn expect(&mut self, expected: char, message: &'static str) -> Result<(), LabelParseError> {
        self.skip_whitespace();
        match self.peek() {
            Some(c) if c == expected => {
                self.bump();
                Ok(())
            }
            _ => Err(self.error(message)),
        }
    }

    fn parse(&mut self) -> Result<Vec<(usize, String)>, LabelParseError> {
        let mut entries = Vec::new();
        self.expect('{', "expected '{'")?;

        loop {
            self.skip_whitespace();
            if self.peek() == Some('}') {
                self.bump();
                break;
            }

            let key = self.parse_key()?;
            self.expect(':', "expected ':'")?;
            let value = self.parse_string()?;
            entries.push((key, value));

            self.skip_whitespace();
            match self.bump() {
                Some(',') => continue,
                Some('}') => break,
                _ => return Err(self.error("expected ',' or '}'")),
            }
        }

        self.skip_whitespace();
        if self.pos != self.input.len() {
            return Err(self.error("trailing characters"));
        }
        Ok(entries)
    }

    fn parse_key(&mut self) -> Result<usize, LabelParseError> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
        }
        let digits = &self.input[start..self.pos];
        if digits.is_empty() {
            return Err(self.error("expected integer key"));
        }

        match digits.parse::<usize>() {
            Ok(key) if key <= MAX_CLASS_ID => Ok(key),
            _ => Err(LabelParseError {
                position: start,
                message: "class id out of range",
            }),
        }
    }

    fn parse_string(&mut self) -> Result<String, LabelParseError> {
        self.skip_whitespace();
        let quote = match self.bump() {
            Some(q @ ('\'' | '"')) => q,
            _ => return Err(self.error("expected quoted name")),
        };

        let mut value = String::new();
        loop {
            match self.bump() {
                Some('\\') => match self.bump() {
                    Some(escaped) => value.push(escaped),
                    None => return Err(self.error("unterminated escape")),
                },
                Some(c) if c == quote => return Ok(value),
                Some(c) => value.push(c),
                None => return Err(self.error("unterminated name")),
            }
        }
    }
}
