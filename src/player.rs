/// Embeddable HTML5 page Slack loads into the video block iframe.
pub fn render_video_player(video_url: &str) -> String {
    format!(r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Video Player</title>
    <style>
        body {{
            margin: 0;
            padding: 0;
            background: #000;
            display: flex;
            justify-content: center;
            align-items: center;
            min-height: 100vh;
        }}
        video {{
            max-width: 100%;
            max-height: 100vh;
            width: 100%;
        }}
    </style>
</head>
<body>
    <video controls autoplay>
        <source src="{}" type="video/mp4">
        Your browser does not support the video tag.
    </video>
</body>
</html>
"#, escape_html_attribute(video_url))
}

pub fn escape_html_attribute(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());

    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(c),
        }
    }

    escaped
}
