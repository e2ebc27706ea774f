use super::{
    BranchNotifications, ButtonAction, Comparison, Event, GotoEvent, GotoTarget, IfEvent,
    KeyToken, MouseSide, ParseError, ParsedLine, PatternSearchEvent, Point, ScrollDirection,
    SearchArea, Target, VisionEvent, VisionProvider, parse_point, parse_region,
};

/// Parse one macro line.
///
/// Returns `Ok` with [`Event::Unrecognized`] when no known shape matches, and
/// `Err` when a shape matched but one of its fields could not be decoded.
pub fn parse_line(line: &str) -> Result<ParsedLine, ParseError> {
    let line = line.trim();
    let (timestamp, rest) = split_timestamp(line);
    Ok(ParsedLine {
        timestamp,
        event: parse_event(rest.trim())?,
    })
}

/// Split a leading `"<seconds> - "` prefix, where seconds is `\d+\.\d+`.
fn split_timestamp(line: &str) -> (Option<f64>, &str) {
    if let Some((head, rest)) = line.split_once(" - ") {
        let is_decimal = head
            .split_once('.')
            .is_some_and(|(int, frac)| is_digits(int) && is_digits(frac));
        if is_decimal && !rest.is_empty() {
            if let Ok(ts) = head.parse::<f64>() {
                return (Some(ts), rest);
            }
        }
    }
    (None, line)
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn parse_event(action: &str) -> Result<Event, ParseError> {
    if let Some(token) = action.strip_prefix("Key pressed: ") {
        return Ok(Event::KeyPress(parse_key_token(token)?));
    }
    if let Some(token) = action.strip_prefix("Key released: ") {
        return Ok(Event::KeyRelease(parse_key_token(token)?));
    }
    if let Some(coords) = action.strip_prefix("Mouse moved to: ") {
        return Ok(Event::MouseMove(point(coords)?));
    }
    if let Some(rest) = action.strip_prefix("Mouse scrolled ") {
        return parse_scroll(rest);
    }
    if let Some(rest) = action.strip_prefix("Mouse Button.") {
        return parse_button(rest);
    }
    if let Some(rest) = action.strip_prefix("Image AI - ") {
        return parse_vision(rest).map(Event::Vision);
    }
    if let Some(rest) = action.strip_prefix("OCR Search - ") {
        return parse_legacy_ocr(rest).map(Event::Vision);
    }
    if let Some(rest) = action.strip_prefix("Search Pattern - ") {
        return parse_pattern(rest).map(Event::PatternSearch);
    }
    if let Some(rest) = action.strip_prefix("If ") {
        return parse_if(rest).map(Event::If);
    }
    if let Some(rest) = action.strip_prefix("Wait: ") {
        return Ok(Event::Wait {
            seconds: seconds("Wait", rest)?,
        });
    }
    if let Some(rest) = action.strip_prefix("Go To - ") {
        return parse_goto(rest).map(Event::Goto);
    }
    if let Some(name) = action.strip_prefix("Checkpoint: ") {
        return Ok(Event::Checkpoint {
            name: name.to_string(),
        });
    }
    Ok(Event::Unrecognized(action.to_string()))
}

fn parse_key_token(token: &str) -> Result<KeyToken, ParseError> {
    let token = token.trim();
    let err = || ParseError::KeyToken(token.to_string());

    if let Some(name) = token.strip_prefix("Key.") {
        if name.is_empty() {
            return Err(err());
        }
        return Ok(KeyToken::Named(name.to_string()));
    }

    let quoted = token.len() >= 3
        && ((token.starts_with('\'') && token.ends_with('\''))
            || (token.starts_with('"') && token.ends_with('"')));
    if quoted {
        let inner = &token[1..token.len() - 1];
        let mut chars = inner.chars();
        let ch = match (chars.next(), chars.next(), chars.next()) {
            (Some(c), None, _) => c,
            // Escaped character, e.g. '\\' or '\''
            (Some('\\'), Some(c), None) => c,
            _ => return Err(err()),
        };
        return Ok(KeyToken::Char { ch, quoted: true });
    }

    let mut chars = token.chars();
    match (chars.next(), chars.next()) {
        (Some(ch), None) => Ok(KeyToken::Char { ch, quoted: false }),
        _ => Err(err()),
    }
}

fn point(text: &str) -> Result<Point, ParseError> {
    parse_point(text).ok_or_else(|| ParseError::Point(text.trim().to_string()))
}

/// Parse an optional ` at: (x, y)` suffix.
fn optional_at(rest: &str) -> Result<Option<Point>, ParseError> {
    let rest = rest.trim();
    if rest.is_empty() {
        return Ok(None);
    }
    match rest.strip_prefix("at: ") {
        Some(coords) => point(coords).map(Some),
        None => Err(ParseError::Point(rest.to_string())),
    }
}

fn parse_scroll(rest: &str) -> Result<Event, ParseError> {
    let (direction, tail) = if let Some(tail) = rest.strip_prefix("up") {
        (ScrollDirection::Up, tail)
    } else if let Some(tail) = rest.strip_prefix("down") {
        (ScrollDirection::Down, tail)
    } else {
        return Ok(Event::Unrecognized(format!("Mouse scrolled {rest}")));
    };
    Ok(Event::MouseScroll {
        direction,
        at: optional_at(tail)?,
    })
}

fn parse_button(rest: &str) -> Result<Event, ParseError> {
    let (side, tail) = if let Some(tail) = rest.strip_prefix("left ") {
        (MouseSide::Left, tail)
    } else if let Some(tail) = rest.strip_prefix("right ") {
        (MouseSide::Right, tail)
    } else {
        return Ok(Event::Unrecognized(format!("Mouse Button.{rest}")));
    };
    let (action, tail) = if let Some(tail) = tail.strip_prefix("pressed") {
        (ButtonAction::Pressed, tail)
    } else if let Some(tail) = tail.strip_prefix("released") {
        (ButtonAction::Released, tail)
    } else {
        return Ok(Event::Unrecognized(format!("Mouse Button.{rest}")));
    };
    Ok(Event::MouseButton {
        side,
        action,
        at: optional_at(tail)?,
    })
}

/// Cursor over a `Label: value, Label: value` field list where the value
/// delimiters are the next known label.
struct Fields<'a> {
    kind: &'static str,
    rest: &'a str,
}

impl<'a> Fields<'a> {
    fn new(kind: &'static str, rest: &'a str) -> Self {
        Self { kind, rest }
    }

    fn missing(&self, field: &'static str) -> ParseError {
        ParseError::MissingField {
            kind: self.kind,
            field,
        }
    }

    /// Consume `label` (e.g. `"Search Area: "`), tolerating a leading `", "`.
    fn expect(&mut self, field: &'static str, label: &str) -> Result<(), ParseError> {
        let rest = self.rest.strip_prefix(", ").unwrap_or(self.rest);
        let rest = rest.trim_start();
        self.rest = rest
            .strip_prefix(label)
            .ok_or_else(|| self.missing(field))?;
        Ok(())
    }

    /// Take the value up to the first occurrence of `delimiter`.
    fn until(&mut self, field: &'static str, delimiter: &str) -> Result<&'a str, ParseError> {
        let at = self
            .rest
            .find(delimiter)
            .ok_or_else(|| self.missing(field))?;
        let value = &self.rest[..at];
        self.rest = &self.rest[at..];
        Ok(value.trim())
    }

    /// Take the value up to the next `", "` or the end of the line.
    fn token(&mut self) -> &'a str {
        let at = self.rest.find(", ").unwrap_or(self.rest.len());
        let value = &self.rest[..at];
        self.rest = &self.rest[at..];
        value.trim()
    }

    fn remaining(&mut self) -> &'a str {
        std::mem::take(&mut self.rest)
    }
}

fn seconds(field: &'static str, text: &str) -> Result<f64, ParseError> {
    let raw = text.trim();
    let number = raw.strip_suffix('s').unwrap_or(raw);
    decimal(field, number)
}

fn decimal(field: &'static str, text: &str) -> Result<f64, ParseError> {
    match text.trim().parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 => Ok(v),
        _ => Err(ParseError::Number {
            field,
            value: text.trim().to_string(),
        }),
    }
}

fn boolean(field: &'static str, text: &str) -> Result<bool, ParseError> {
    match text.trim() {
        "True" => Ok(true),
        "False" => Ok(false),
        other => Err(ParseError::Bool {
            field,
            value: other.to_string(),
        }),
    }
}

/// Take a region literal, which ends at the first `}`.
fn region_field<'a>(fields: &mut Fields<'a>) -> Result<&'a str, ParseError> {
    let end = fields
        .rest
        .find('}')
        .ok_or_else(|| fields.missing("Area"))?;
    let literal = &fields.rest[..=end];
    fields.rest = &fields.rest[end + 1..];
    Ok(literal)
}

fn parse_vision(rest: &str) -> Result<VisionEvent, ParseError> {
    let mut f = Fields::new("Image AI", rest);
    f.expect("Provider", "Provider:")?;
    let provider = VisionProvider::from_name(f.until("Provider", ", Feature:")?)?;
    f.expect("Feature", "Feature:")?;
    let feature = f.until("Feature", ", Area:")?.to_string();
    f.expect("Area", "Area:")?;
    let area = parse_region(region_field(&mut f)?)?;

    let wait = if f.rest.trim_start_matches([',', ' ']).starts_with("Wait:") {
        f.expect("Wait", "Wait:")?;
        Some(seconds("Wait", f.token())?)
    } else {
        None
    };

    f.expect("Variable", "Variable:")?;
    let variable = f.until("Variable", ", Variable Content:")?.to_string();
    if variable.is_empty() {
        return Err(f.missing("Variable"));
    }
    f.expect("Variable Content", "Variable Content:")?;
    let content = f.remaining().trim().to_string();

    Ok(VisionEvent {
        provider,
        feature,
        area,
        wait,
        variable,
        content,
        legacy: false,
    })
}

fn parse_legacy_ocr(rest: &str) -> Result<VisionEvent, ParseError> {
    let mut f = Fields::new("OCR Search", rest);
    f.expect("Area", "Area:")?;
    let area = parse_region(region_field(&mut f)?)?;
    f.expect("Wait", "Wait:")?;
    let wait = seconds("Wait", f.until("Wait", ", Variable:")?)?;
    f.expect("Variable", "Variable:")?;
    let variable = f.until("Variable", ", Variable Content:")?.to_string();
    f.expect("Variable Content", "Variable Content:")?;
    let content = f.remaining().trim().to_string();

    Ok(VisionEvent {
        provider: VisionProvider::LocalOcr,
        feature: "ocr".to_string(),
        area,
        wait: Some(wait),
        variable,
        content,
        legacy: true,
    })
}

fn parse_notifications(f: &mut Fields<'_>) -> BranchNotifications {
    let mut out = BranchNotifications::default();
    let tail = f.remaining();
    let tail = match tail.strip_prefix(", Succeed Notification: ") {
        Some(rest) => {
            let (name, rest) = match rest.find(", Fail Notification: ") {
                Some(at) => (&rest[..at], &rest[at..]),
                None => (rest, ""),
            };
            out.succeed = Some(name.trim().to_string());
            rest
        }
        None => tail,
    };
    if let Some(name) = tail.strip_prefix(", Fail Notification: ") {
        out.fail = Some(name.trim().to_string());
    }
    out
}

fn parse_pattern(rest: &str) -> Result<PatternSearchEvent, ParseError> {
    let mut f = Fields::new("Search Pattern", rest);
    f.expect("Image", "Image:")?;
    let image = f.until("Image", ", Search Area:")?.to_string();
    f.expect("Search Area", "Search Area:")?;
    let area = match f.until("Search Area", ", Succeed Go To:")? {
        "Full Screen" => SearchArea::FullScreen,
        literal => SearchArea::Region(parse_region(literal)?),
    };
    f.expect("Succeed Go To", "Succeed Go To:")?;
    let succeed = Target::from_label(f.until("Succeed Go To", ", Fail Go To:")?);
    f.expect("Fail Go To", "Fail Go To:")?;
    let fail = Target::from_label(f.until("Fail Go To", ", Click:")?);
    f.expect("Click", "Click:")?;
    let click = boolean("Click", f.until("Click", ", Wait:")?)?;
    f.expect("Wait", "Wait:")?;
    let wait = seconds("Wait", f.until("Wait", ", Threshold:")?)?;
    f.expect("Threshold", "Threshold:")?;
    let threshold = decimal("Threshold", f.until("Threshold", ", Scene Change:")?)?;
    f.expect("Scene Change", "Scene Change:")?;
    let scene_change = boolean("Scene Change", f.token())?;
    let notifications = parse_notifications(&mut f);

    Ok(PatternSearchEvent {
        image,
        area,
        succeed,
        fail,
        click,
        wait,
        threshold,
        scene_change,
        notifications,
    })
}

fn parse_if(rest: &str) -> Result<IfEvent, ParseError> {
    let missing = |field| ParseError::MissingField { kind: "If", field };

    let (variable, rest) = rest.split_once(' ').ok_or_else(|| missing("variable"))?;
    if variable.is_empty() || !variable.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return Err(missing("variable"));
    }
    let (op, rest) = rest.split_once(' ').ok_or_else(|| missing("operator"))?;
    let op = Comparison::from_token(op)?;

    // The value may itself contain spaces; it ends at the first branch label.
    let mut f = Fields::new("If", rest);
    let value = match f.rest.find(", Succeed Go To:") {
        Some(at) => {
            let value = &f.rest[..at];
            f.rest = &f.rest[at..];
            value.trim().to_string()
        }
        None => return Err(missing("Succeed Go To")),
    };
    f.expect("Succeed Go To", "Succeed Go To:")?;
    let succeed = Target::from_label(f.until("Succeed Go To", ", Fail Go To:")?);
    f.expect("Fail Go To", "Fail Go To:")?;
    let fail = Target::from_label(f.until("Fail Go To", ", Wait:")?);
    f.expect("Wait", "Wait:")?;
    let wait = seconds("Wait", f.token())?;
    let notifications = parse_notifications(&mut f);

    Ok(IfEvent {
        variable: variable.to_string(),
        op,
        value,
        succeed,
        fail,
        wait,
        notifications,
    })
}

fn parse_goto(rest: &str) -> Result<GotoEvent, ParseError> {
    let (keyword, tail) = rest
        .split_once(": ")
        .ok_or(ParseError::MissingField {
            kind: "Go To",
            field: "target",
        })?;
    let (target, element) = match tail.split_once(", Element: ") {
        Some((target, element)) => (target.trim(), Some(element.to_string())),
        None => (tail.trim(), None),
    };
    let target = match keyword {
        "Checkpoint" => GotoTarget::Checkpoint(target.to_string()),
        "Target" => GotoTarget::Target(target.to_string()),
        "Line" => GotoTarget::Line(target.parse().map_err(|_| ParseError::Number {
            field: "Line",
            value: target.to_string(),
        })?),
        _ => {
            return Err(ParseError::MissingField {
                kind: "Go To",
                field: "Checkpoint|Line",
            });
        }
    };
    Ok(GotoEvent { target, element })
}

/// Replace the base64 payload following `Image: ` in a stored line, leaving
/// every other byte untouched.
pub fn replace_image_payload(line: &str, new_image: &str) -> String {
    const LABEL: &str = "Image: ";
    let Some(at) = line.find(LABEL) else {
        return line.to_string();
    };
    let start = at + LABEL.len();
    let end = line[start..]
        .find(|c: char| c == ',' || c.is_whitespace())
        .map_or(line.len(), |off| start + off);
    if end == start {
        return line.to_string();
    }
    let mut out = String::with_capacity(line.len() - (end - start) + new_image.len());
    out.push_str(&line[..start]);
    out.push_str(new_image);
    out.push_str(&line[end..]);
    out
}
