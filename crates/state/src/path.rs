//! Dotted-path navigation and mutation of [`serde_json::Value`]s.

/// Navigate a JSON value by a dot-separated path (object keys or array
/// indices). Returns `None` for a missing key, out-of-bounds index, or a
/// path segment applied to a scalar.
#[must_use]
pub fn get_path<'a>(value: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    if path.is_empty() {
        return Some(value);
    }
    let mut current = value;
    for segment in path.split('.') {
        current = match current {
            serde_json::Value::Object(map) => map.get(segment)?,
            serde_json::Value::Array(arr) => arr.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Set a value at a dot-separated path, cloning and rebuilding every
/// container along the path rather than mutating shared state in place.
/// Missing intermediate objects are created; missing array slots are not
/// (an out-of-bounds array index is an error).
pub fn set_path(
    root: &serde_json::Value,
    path: &str,
    new_value: serde_json::Value,
) -> Result<serde_json::Value, String> {
    if path.is_empty() {
        return Ok(new_value);
    }
    let mut segments = path.split('.');
    let head = segments.next().expect("split always yields at least one segment");
    let rest: Vec<&str> = segments.collect();
    set_segment(root, head, &rest, new_value)
}

fn set_segment(
    root: &serde_json::Value,
    head: &str,
    rest: &[&str],
    new_value: serde_json::Value,
) -> Result<serde_json::Value, String> {
    let rest_path = rest.join(".");
    match root {
        serde_json::Value::Object(map) => {
            let mut map = map.clone();
            let child = map.get(head).cloned().unwrap_or(serde_json::Value::Null);
            let updated = if rest.is_empty() { new_value } else { set_path(&child, &rest_path, new_value)? };
            map.insert(head.to_owned(), updated);
            Ok(serde_json::Value::Object(map))
        }
        serde_json::Value::Array(arr) => {
            let index: usize = head.parse().map_err(|_| format!("'{head}' is not a valid array index"))?;
            if index >= arr.len() {
                return Err(format!("array index {index} is out of bounds (len {})", arr.len()));
            }
            let mut arr = arr.clone();
            let updated = if rest.is_empty() { new_value } else { set_path(&arr[index], &rest_path, new_value)? };
            arr[index] = updated;
            Ok(serde_json::Value::Array(arr))
        }
        serde_json::Value::Null => {
            // Treat null-valued roots as an empty object to allow building up
            // nested structure on first write.
            set_segment(&serde_json::Value::Object(serde_json::Map::new()), head, rest, new_value)
        }
        other => Err(format!("cannot set path segment '{head}' on non-container value {other}")),
    }
}
