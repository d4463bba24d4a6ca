//! `<img:XXXXX>` tags in viewer messages and their vision-model descriptions.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::llm::{Attachment, ChatMessage, LlmClient};
use crate::store::ImageStore;

static TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<img:([A-Za-z0-9]{5})>").expect("static image tag pattern")
});

const VISION_PROMPT: &str = "Describe the image as if you are a witty streamer's AI co-host in a witty, \
playful style while staying in third person.\n\
Do not use first-person expressions like \"I\" or \"we\", and avoid conversational greetings.\n\
The description should read like a clever commentary, not like someone talking about themselves, \
in 4 to 20 sentences. No markdown.";

/// Replace each tag with a speakable `image_N`, numbered from 1.
pub fn replace_image_tags_for_tts(text: &str) -> String {
    let mut n = 0;
    TAG.replace_all(text, |_: &regex::Captures<'_>| {
        n += 1;
        format!("image_{n}")
    })
    .into_owned()
}

async fn describe_one(
    llm: Arc<dyn LlmClient>,
    images: Arc<dyn ImageStore>,
    id: String,
) -> (String, Option<String>) {
    let data = match images.get_image(&id).await {
        Ok(data) => data,
        Err(e) => {
            warn!(image = %id, error = %e, "failed to fetch image");
            return (id, None);
        }
    };

    let messages = vec![ChatMessage::system("."), ChatMessage::user(VISION_PROMPT)];
    match llm.ask_messages(messages, vec![Attachment::png(data)]).await {
        Ok(analysis) if !analysis.trim().is_empty() => (id, Some(analysis)),
        Ok(_) => {
            warn!(image = %id, "image analysis was empty");
            (id, None)
        }
        Err(e) => {
            warn!(image = %id, error = %e, "image analysis failed");
            (id, None)
        }
    }
}

/// Describe every image concurrently and splice the descriptions into
/// `message` as `<image_ID:{description}>`. Tags of images that could not be
/// described are removed.
pub async fn describe_images(
    llm: Arc<dyn LlmClient>,
    images: Arc<dyn ImageStore>,
    image_ids: &[String],
    message: &str,
) -> String {
    let mut tasks = JoinSet::new();
    for id in image_ids {
        tasks.spawn(describe_one(llm.clone(), images.clone(), id.clone()));
    }

    let mut results = Vec::with_capacity(image_ids.len());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(result) => results.push(result),
            Err(e) => warn!(error = %e, "image analysis task failed"),
        }
    }

    let mut out = message.to_string();
    for (id, analysis) in results {
        let tag = format!("<img:{id}>");
        let replacement = match analysis {
            Some(text) => format!("<image_{id}:{{{text}}}>"),
            None => String::new(),
        };
        out = out.replacen(&tag, &replacement, 1);
    }
    debug!(images = image_ids.len(), "image analysis finished");
    out
}
